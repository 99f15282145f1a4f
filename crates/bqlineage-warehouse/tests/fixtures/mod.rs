//! Test fixtures for audit log source integration tests
//!
//! A small warehouse modelled on a typical ELT project: raw landing tables,
//! staging models built from them, and marts built from staging. Audit rows
//! include the noise real audit logs contain: DELETE statements, scratch
//! datasets, queries run by humans, and writes to other projects.

use bqlineage_core::AuditLogEntry;

pub const PROJECT: &str = "acme-analytics";
pub const ETL: &str = "airflow@acme-analytics.iam.gserviceaccount.com";
pub const DBT: &str = "dbt@acme-analytics.iam.gserviceaccount.com";
pub const HUMAN: &str = "analyst@acme.com";

/// Datasets present in INFORMATION_SCHEMA.SCHEMATA
pub fn datasets() -> Vec<&'static str> {
    vec!["raw", "staging", "marts", "_script_tmp", "personal_alice"]
}

/// Raw audit log rows
pub fn audit_log() -> Vec<AuditLogEntry> {
    vec![
        // staging built from raw
        AuditLogEntry::new(ETL, "acme-analytics.staging.customers", "acme-analytics.raw.crm_customers"),
        AuditLogEntry::new(ETL, "acme-analytics.staging.orders", "acme-analytics.raw.shop_orders,acme-analytics.raw.shop_payments"),
        // the same job ran twice
        AuditLogEntry::new(ETL, "acme-analytics.staging.orders", "acme-analytics.raw.shop_orders,acme-analytics.raw.shop_payments"),
        // marts built by dbt
        AuditLogEntry::new(DBT, "acme-analytics.marts.customer_ltv", "acme-analytics.staging.customers,acme-analytics.staging.orders"),
        // DELETE statement: destination equals the source list
        AuditLogEntry::new(ETL, "acme-analytics.staging.orders", "acme-analytics.staging.orders"),
        // scratch dataset used by a scripted job
        AuditLogEntry::new(ETL, "acme-analytics.marts.daily_revenue", "acme-analytics._script_tmp.revenue_0001,acme-analytics.staging.orders"),
        // personal sandbox
        AuditLogEntry::new(DBT, "acme-analytics.personal_alice.scratch", "acme-analytics.marts.customer_ltv"),
        // human query
        AuditLogEntry::new(HUMAN, "acme-analytics.marts.adhoc", "acme-analytics.staging.orders"),
        // write into another project
        AuditLogEntry::new(ETL, "acme-shared.exports.orders", "acme-analytics.staging.orders"),
    ]
}
