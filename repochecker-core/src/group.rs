//! Group membership of submit requests.
//!
//! A group request bundles submit requests that must be accepted or declined
//! together. The registry is owned by one review pass and filled lazily.

use std::collections::HashMap;

use tracing::debug;

use crate::error::ServiceResult;
use crate::model::RequestId;
use crate::obs::{BuildService, RequestQuery};

#[derive(Debug, Default)]
pub struct GroupRegistry {
    /// member id -> group id
    grouped: HashMap<RequestId, RequestId>,
    /// group id -> member ids
    groups: HashMap<RequestId, Vec<RequestId>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_of(&self, id: RequestId) -> Option<RequestId> {
        self.grouped.get(&id).copied()
    }

    /// Members of a known group; empty for unknown groups and lone requests.
    pub fn members(&self, group: RequestId) -> &[RequestId] {
        self.groups.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_member(&self, group: RequestId, id: RequestId) -> bool {
        self.members(group).contains(&id)
    }

    pub fn record(&mut self, group: RequestId, members: Vec<RequestId>) {
        for member in &members {
            self.grouped.insert(*member, group);
        }
        self.groups.insert(group, members);
    }

    /// The group a request belongs to. A request that is in no group is
    /// its own group.
    pub async fn resolve(
        &mut self,
        service: &dyn BuildService,
        id: RequestId,
    ) -> ServiceResult<RequestId> {
        if let Some(group) = self.group_of(id) {
            return Ok(group);
        }

        let found = service
            .search_requests(&RequestQuery::GroupContaining { member: id })
            .await?;
        let Some(group) = found.first().map(|request| request.id) else {
            return Ok(id);
        };

        if !self.groups.contains_key(&group) {
            let request = service.request(group).await?;
            let members: Vec<RequestId> = request
                .actions
                .iter()
                .flat_map(|action| action.grouped.iter().copied())
                .collect();
            debug!("Group {} has members {:?}", group, members);
            self.record(group, members);
        }
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestAction;
    use crate::testing::FakeBuildService;

    #[tokio::test]
    async fn test_lone_request_is_its_own_group() {
        let service = FakeBuildService::new();
        let mut registry = GroupRegistry::new();

        let group = registry.resolve(&service, RequestId(10)).await.unwrap();
        assert_eq!(group, RequestId(10));
        assert!(registry.members(group).is_empty());
    }

    #[tokio::test]
    async fn test_group_lookup_records_both_directions() {
        let service = FakeBuildService::new();
        service.add_request(
            RequestId(100),
            vec![RequestAction::group(vec![RequestId(1), RequestId(2)])],
        );
        let mut registry = GroupRegistry::new();

        let group = registry.resolve(&service, RequestId(1)).await.unwrap();
        assert_eq!(group, RequestId(100));
        assert_eq!(registry.members(group), &[RequestId(1), RequestId(2)]);
        assert_eq!(registry.group_of(RequestId(2)), Some(RequestId(100)));
        assert!(registry.is_member(group, RequestId(2)));
        assert!(!registry.is_member(group, RequestId(3)));
    }

    #[tokio::test]
    async fn test_known_member_skips_the_search() {
        let service = FakeBuildService::new();
        let mut registry = GroupRegistry::new();
        registry.record(RequestId(100), vec![RequestId(1), RequestId(2)]);

        let group = registry.resolve(&service, RequestId(2)).await.unwrap();
        assert_eq!(group, RequestId(100));
        assert_eq!(service.search_count(), 0);
    }

    #[tokio::test]
    async fn test_search_failure_is_reported() {
        let service = FakeBuildService::new();
        service.fail_searches();
        let mut registry = GroupRegistry::new();

        assert!(registry.resolve(&service, RequestId(5)).await.is_err());
    }
}
