use tonic::Status;

use bifrost_proto::v1;
use bifrost_store::KeyFilters;
use bifrost_types::{FilterOperator, KvStoreError};

pub fn kvstore_to_status(err: KvStoreError) -> Status {
    match &err {
        KvStoreError::UnknownArea(_) | KvStoreError::NotFound(_) => {
            Status::not_found(err.to_string())
        }
        KvStoreError::Config(_) | KvStoreError::Malformed(_) => {
            Status::invalid_argument(err.to_string())
        }
        KvStoreError::Transport(_) | KvStoreError::Shutdown => {
            Status::unavailable(err.to_string())
        }
        KvStoreError::Timeout => Status::deadline_exceeded(err.to_string()),
        KvStoreError::SubscriberLagged => Status::resource_exhausted(err.to_string()),
    }
}

/// Build domain filters from an optional wire spec. A spec with both lists
/// empty means "no filter", same as omitting it.
pub fn filters_from_proto(
    spec: Option<v1::KeyFilterSpec>,
) -> Result<Option<KeyFilters>, Status> {
    let spec = match spec {
        Some(s) if !s.key_prefixes.is_empty() || !s.originator_ids.is_empty() => s,
        _ => return Ok(None),
    };
    let op = match v1::FilterOperator::try_from(spec.op).unwrap_or(v1::FilterOperator::Any) {
        v1::FilterOperator::All => FilterOperator::All,
        _ => FilterOperator::Any,
    };
    KeyFilters::new(spec.key_prefixes, spec.originator_ids.into_iter().collect(), op)
        .map(Some)
        .map_err(kvstore_to_status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_means_no_filter() {
        assert!(filters_from_proto(None).unwrap().is_none());
        let spec = v1::KeyFilterSpec { key_prefixes: vec![], originator_ids: vec![], op: 0 };
        assert!(filters_from_proto(Some(spec)).unwrap().is_none());
    }

    #[test]
    fn bad_pattern_surfaces_as_invalid_argument() {
        let spec = v1::KeyFilterSpec {
            key_prefixes: vec!["adj:[".to_string()],
            originator_ids: vec![],
            op: v1::FilterOperator::Any as i32,
        };
        let status = filters_from_proto(Some(spec)).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn operator_mapping() {
        let spec = v1::KeyFilterSpec {
            key_prefixes: vec!["adj:".to_string()],
            originator_ids: vec![],
            op: v1::FilterOperator::All as i32,
        };
        let filters = filters_from_proto(Some(spec)).unwrap().unwrap();
        assert_eq!(filters.operator(), FilterOperator::All);
    }
}
