//! Trigger request validation.
//!
//! A trigger arrives as loosely typed JSON. [`TriggerRequest::into_new_job`]
//! turns it into a [`NewJob`] or a [`CoreError::Validation`]; nothing is
//! written on failure.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::job::{JobCategory, JobScope, NewJob};

/// Maximum number of explicit target ids per trigger.
pub const MAX_TARGET_IDS: usize = 100;

/// Maximum item limit a trigger may request.
pub const MAX_ITEM_LIMIT: i64 = 10_000;

/// Maximum length of the city filter.
pub const MAX_CITY_LEN: usize = 100;

/// Raw trigger payload as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TriggerRequest {
    pub category: String,
    pub scope: String,
    #[serde(default)]
    #[validate(length(max = (MAX_TARGET_IDS as u64), message = "too many target ids"))]
    pub target_ids: Option<Vec<String>>,
    #[serde(default)]
    #[validate(length(max = (MAX_CITY_LEN as u64), message = "city is too long"))]
    pub city: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, max = MAX_ITEM_LIMIT, message = "limit is out of range"))]
    pub limit: Option<i64>,
}

impl TriggerRequest {
    /// Validate the payload and build the job to insert.
    pub fn into_new_job(self, triggered_by: &str) -> Result<NewJob, CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        let category: JobCategory = self.category.trim().parse()?;
        let scope: JobScope = self.scope.trim().parse()?;

        let target_ids = match (scope, self.target_ids) {
            (JobScope::SpecificIds, Some(ids)) if !ids.is_empty() => Some(parse_target_ids(&ids)?),
            (JobScope::SpecificIds, _) => {
                return Err(CoreError::Validation(
                    "target_ids must be a non-empty list when scope is specific-ids".to_string(),
                ))
            }
            (_, Some(ids)) if !ids.is_empty() => {
                return Err(CoreError::Validation(
                    "target_ids are only accepted when scope is specific-ids".to_string(),
                ))
            }
            (_, _) => None,
        };

        let target_city = self
            .city
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(NewJob {
            category,
            scope,
            target_city,
            target_ids,
            limit: self.limit,
            triggered_by: triggered_by.to_string(),
        })
    }
}

fn parse_target_ids(raw: &[String]) -> Result<Vec<uuid::Uuid>, CoreError> {
    if raw.len() > MAX_TARGET_IDS {
        return Err(CoreError::Validation(format!(
            "At most {MAX_TARGET_IDS} target ids may be given"
        )));
    }
    let mut ids = Vec::with_capacity(raw.len());
    for (i, value) in raw.iter().enumerate() {
        let id = uuid::Uuid::parse_str(value.trim()).map_err(|_| {
            CoreError::Validation(format!("Target id at index {i} is not a valid UUID"))
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(category: &str, scope: &str) -> TriggerRequest {
        TriggerRequest {
            category: category.to_string(),
            scope: scope.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn minimal_request_is_accepted() {
        let job = request("scrape", "pending-items")
            .into_new_job("ops@example.com")
            .unwrap();
        assert_eq!(job.category, JobCategory::Scrape);
        assert_eq!(job.scope, JobScope::PendingItems);
        assert_eq!(job.triggered_by, "ops@example.com");
        assert!(job.target_ids.is_none());
    }

    #[test]
    fn unknown_category_rejected() {
        assert_matches!(
            request("crawl", "all").into_new_job("a"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn specific_ids_requires_ids() {
        assert_matches!(
            request("process", "specific-ids").into_new_job("a"),
            Err(CoreError::Validation(_))
        );
        let mut empty = request("process", "specific-ids");
        empty.target_ids = Some(vec![]);
        assert_matches!(empty.into_new_job("a"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn malformed_target_id_rejected() {
        let mut req = request("process", "specific-ids");
        req.target_ids = Some(vec!["not-a-uuid".to_string()]);
        assert_matches!(req.into_new_job("a"), Err(CoreError::Validation(msg)) if msg.contains("index 0"));
    }

    #[test]
    fn duplicate_target_ids_collapse() {
        let id = uuid::Uuid::new_v4().to_string();
        let mut req = request("embed", "specific-ids");
        req.target_ids = Some(vec![id.clone(), id]);
        let job = req.into_new_job("a").unwrap();
        assert_eq!(job.target_ids.map(|ids| ids.len()), Some(1));
    }

    #[test]
    fn too_many_target_ids_rejected() {
        let mut req = request("embed", "specific-ids");
        req.target_ids = Some(
            (0..=MAX_TARGET_IDS)
                .map(|_| uuid::Uuid::new_v4().to_string())
                .collect(),
        );
        assert_matches!(req.into_new_job("a"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn ids_without_specific_scope_rejected() {
        let mut req = request("scrape", "all");
        req.target_ids = Some(vec![uuid::Uuid::new_v4().to_string()]);
        assert_matches!(req.into_new_job("a"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn limit_bounds_enforced() {
        let mut zero = request("scrape", "all");
        zero.limit = Some(0);
        assert_matches!(zero.into_new_job("a"), Err(CoreError::Validation(_)));

        let mut huge = request("scrape", "all");
        huge.limit = Some(MAX_ITEM_LIMIT + 1);
        assert_matches!(huge.into_new_job("a"), Err(CoreError::Validation(_)));

        let mut max = request("scrape", "all");
        max.limit = Some(MAX_ITEM_LIMIT);
        assert_eq!(max.into_new_job("a").unwrap().limit, Some(MAX_ITEM_LIMIT));
    }

    #[test]
    fn long_city_rejected_and_blank_city_dropped() {
        let mut long = request("scrape", "pending-items");
        long.city = Some("x".repeat(MAX_CITY_LEN + 1));
        assert_matches!(long.into_new_job("a"), Err(CoreError::Validation(_)));

        let mut blank = request("scrape", "pending-items");
        blank.city = Some("   ".to_string());
        assert!(blank.into_new_job("a").unwrap().target_city.is_none());
    }

    #[test]
    fn validation_bounds_follow_the_constants() {
        let mut req = request("embed", "specific-ids");
        req.city = Some("x".repeat(MAX_CITY_LEN + 1));
        req.target_ids = Some(vec![String::new(); MAX_TARGET_IDS + 1]);
        req.limit = Some(MAX_ITEM_LIMIT + 1);

        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert_eq!(fields["city"][0].params["max"], MAX_CITY_LEN as u64);
        assert_eq!(fields["target_ids"][0].params["max"], MAX_TARGET_IDS as u64);
        assert_eq!(fields["limit"][0].params["max"], MAX_ITEM_LIMIT);
    }
}
