//! Namespace derivation and metadata-filter construction.
//!
//! Tenant isolation lives here and only here: every query and every delete
//! builds its filter through [`TenantFilter`], and the index gateway refuses
//! any filter that does not pass [`validate_filter`]. A bug in this module is
//! a tenant-isolation breach, which is why it is a single pure module rather
//! than per-call-site filter assembly.

use crate::models::{QueryFilters, TenantId};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::warn;

/// Derive the index namespace for a tenant: `org_{org_id}_user_{user_id}`.
pub fn namespace(tenant: &TenantId) -> String {
    format!("org_{}_user_{}", tenant.org_id, tenant.user_id)
}

/// Builder for tenant-scoped metadata filters with AND semantics.
///
/// The tenant equality pair is mandatory and always present in the built
/// filter; date range, sender, thread and document clauses are optional
/// refinements.
#[derive(Debug, Clone)]
pub struct TenantFilter {
    tenant: TenantId,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    sender: Option<String>,
    thread_id: Option<String>,
    document_id: Option<String>,
}

impl TenantFilter {
    pub fn new(tenant: &TenantId) -> Self {
        Self {
            tenant: tenant.clone(),
            date_from: None,
            date_to: None,
            sender: None,
            thread_id: None,
            document_id: None,
        }
    }

    /// Build from the API-facing filter set, parsing ISO date strings.
    /// Unparseable dates are dropped with a warning rather than failing the
    /// query.
    pub fn from_query(tenant: &TenantId, filters: &QueryFilters) -> Self {
        let mut builder = Self::new(tenant);
        builder.date_from = filters.date_from.as_deref().and_then(parse_filter_date);
        builder.date_to = filters.date_to.as_deref().and_then(parse_filter_date);
        builder.sender = filters.sender.clone();
        builder
    }

    pub fn date_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    /// Combine all clauses. A lone tenant clause is emitted bare; anything
    /// more is wrapped under `$and`.
    pub fn build(&self) -> Value {
        let mut clauses = vec![json!({
            "org_id": {"$eq": self.tenant.org_id},
            "user_id": {"$eq": self.tenant.user_id},
        })];

        if self.date_from.is_some() || self.date_to.is_some() {
            let mut range = serde_json::Map::new();
            if let Some(from) = self.date_from {
                range.insert("$gte".to_string(), json!(from.to_rfc3339()));
            }
            if let Some(to) = self.date_to {
                range.insert("$lte".to_string(), json!(to.to_rfc3339()));
            }
            clauses.push(json!({ "sent_at": Value::Object(range) }));
        }

        if let Some(sender) = &self.sender {
            clauses.push(json!({"sender": {"$eq": sender}}));
        }

        if let Some(thread_id) = &self.thread_id {
            clauses.push(json!({"thread_id": {"$eq": thread_id}}));
        }

        if let Some(document_id) = &self.document_id {
            clauses.push(json!({"email_id": {"$eq": document_id}}));
        }

        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            json!({ "$and": clauses })
        }
    }
}

/// True when the filter carries both tenant keys somewhere in its structure.
/// The gateway rejects anything else before it reaches the index service.
pub fn validate_filter(filter: &Value) -> bool {
    contains_key(filter, "org_id") && contains_key(filter, "user_id")
}

fn contains_key(value: &Value, key: &str) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(key) || map.values().any(|nested| contains_key(nested, key))
        }
        Value::Array(items) => items.iter().any(|nested| contains_key(nested, key)),
        _ => false,
    }
}

fn parse_filter_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    warn!(date = raw, "invalid filter date format, ignoring");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId::new("acme", "u-42")
    }

    #[test]
    fn namespace_combines_org_and_user() {
        assert_eq!(namespace(&tenant()), "org_acme_user_u-42");
    }

    #[test]
    fn distinct_tenants_never_share_a_namespace() {
        let pairs = [
            ("a", "1"),
            ("a", "2"),
            ("b", "1"),
            ("b", "2"),
            ("a_user", "x"),
            ("a", "user_x"),
        ];

        for (left_index, left) in pairs.iter().enumerate() {
            for (right_index, right) in pairs.iter().enumerate() {
                let left_ns = namespace(&TenantId::new(left.0, left.1));
                let right_ns = namespace(&TenantId::new(right.0, right.1));
                if left_index == right_index {
                    assert_eq!(left_ns, right_ns);
                } else {
                    assert_ne!(left_ns, right_ns, "{left:?} vs {right:?}");
                }
            }
        }
    }

    #[test]
    fn bare_tenant_filter_has_no_and_wrapper() {
        let filter = TenantFilter::new(&tenant()).build();
        assert_eq!(filter["org_id"]["$eq"], "acme");
        assert_eq!(filter["user_id"]["$eq"], "u-42");
        assert!(filter.get("$and").is_none());
    }

    #[test]
    fn every_built_filter_carries_the_tenant_pair() {
        let variants = vec![
            TenantFilter::new(&tenant()).build(),
            TenantFilter::from_query(
                &tenant(),
                &QueryFilters {
                    date_from: Some("2024-01-01".to_string()),
                    date_to: Some("2024-06-30".to_string()),
                    sender: Some("boss@acme.com".to_string()),
                },
            )
            .build(),
            TenantFilter::new(&tenant())
                .sender("a@b.c")
                .thread_id("t-9")
                .document_id("mail-3")
                .build(),
        ];

        for filter in variants {
            assert!(validate_filter(&filter), "missing tenant pair: {filter}");
        }
    }

    #[test]
    fn refinements_are_combined_under_and() {
        let filter = TenantFilter::new(&tenant()).sender("boss@acme.com").build();
        let clauses = filter["$and"].as_array().expect("$and wrapper");
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0]["org_id"]["$eq"], "acme");
        assert_eq!(clauses[1]["sender"]["$eq"], "boss@acme.com");
    }

    #[test]
    fn date_range_uses_gte_and_lte_on_sent_at() {
        let filters = QueryFilters {
            date_from: Some("2024-01-01".to_string()),
            date_to: Some("2024-02-01".to_string()),
            sender: None,
        };
        let filter = TenantFilter::from_query(&tenant(), &filters).build();
        let clauses = filter["$and"].as_array().unwrap();

        let range = &clauses[1]["sent_at"];
        assert_eq!(range["$gte"], "2024-01-01T00:00:00+00:00");
        assert_eq!(range["$lte"], "2024-02-01T00:00:00+00:00");
    }

    #[test]
    fn open_ended_date_range_emits_only_one_bound() {
        let filters = QueryFilters {
            date_from: Some("2024-01-01".to_string()),
            date_to: None,
            sender: None,
        };
        let filter = TenantFilter::from_query(&tenant(), &filters).build();
        let range = &filter["$and"][1]["sent_at"];
        assert!(range.get("$gte").is_some());
        assert!(range.get("$lte").is_none());
    }

    #[test]
    fn invalid_dates_are_dropped_not_fatal() {
        let filters = QueryFilters {
            date_from: Some("last tuesday".to_string()),
            date_to: None,
            sender: None,
        };
        let filter = TenantFilter::from_query(&tenant(), &filters).build();
        assert!(filter.get("$and").is_none());
        assert!(validate_filter(&filter));
    }

    #[test]
    fn rfc3339_timestamps_are_accepted() {
        let filters = QueryFilters {
            date_from: Some("2024-03-05T12:30:00Z".to_string()),
            date_to: None,
            sender: None,
        };
        let filter = TenantFilter::from_query(&tenant(), &filters).build();
        assert_eq!(filter["$and"][1]["sent_at"]["$gte"], "2024-03-05T12:30:00+00:00");
    }

    #[test]
    fn validate_rejects_filters_without_tenant_pair() {
        assert!(!validate_filter(&json!({})));
        assert!(!validate_filter(&json!({"sender": {"$eq": "a@b.c"}})));
        assert!(!validate_filter(&json!({"org_id": {"$eq": "acme"}})));
        assert!(!validate_filter(&json!({"user_id": {"$eq": "u-1"}})));
        assert!(!validate_filter(&json!({
            "$and": [{"sender": {"$eq": "a@b.c"}}, {"thread_id": {"$eq": "t"}}]
        })));
    }

    #[test]
    fn validate_accepts_nested_tenant_pair() {
        assert!(validate_filter(&json!({
            "$and": [
                {"org_id": {"$eq": "acme"}, "user_id": {"$eq": "u-1"}},
                {"sent_at": {"$gte": "2024-01-01T00:00:00+00:00"}},
            ]
        })));
    }

    #[test]
    fn filters_for_different_tenants_never_collide() {
        // Structural isolation: tenant A's filter can never satisfy tenant
        // B's equality pair, for any pair of distinct tenants.
        let tenants = [
            TenantId::new("org-1", "user-1"),
            TenantId::new("org-1", "user-2"),
            TenantId::new("org-2", "user-1"),
            TenantId::new("org-12", "user"),
        ];

        for (i, left) in tenants.iter().enumerate() {
            for (j, right) in tenants.iter().enumerate() {
                if i == j {
                    continue;
                }
                let filter = TenantFilter::new(left).build();
                assert!(
                    filter["org_id"]["$eq"] != right.org_id
                        || filter["user_id"]["$eq"] != right.user_id,
                    "filter for {left:?} would match {right:?}"
                );
            }
        }
    }
}
