use std::fmt;
use std::str::FromStr;

use crate::error::ServiceError;

/// Every operation the service understands.  `as_str` yields the exact wire
/// spelling; note `delete` is spelled plainly on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Retrieve,
    Update,
    Delete,
    Count,
    Distinct,
    Index,
    DropIndex,
    Bulk,
    Pipeline,
    Transaction,
    CreateCollection,
    RenameCollection,
    DropCollection,
    CreateTimeseries,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Retrieve => "retrieve",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Count => "count",
            Action::Distinct => "distinct",
            Action::Index => "index",
            Action::DropIndex => "dropIndex",
            Action::Bulk => "bulk",
            Action::Pipeline => "pipeline",
            Action::Transaction => "transaction",
            Action::CreateCollection => "createCollection",
            Action::RenameCollection => "renameCollection",
            Action::DropCollection => "dropCollection",
            Action::CreateTimeseries => "createTimeseries",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Action::Create),
            "retrieve" => Ok(Action::Retrieve),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "count" => Ok(Action::Count),
            "distinct" => Ok(Action::Distinct),
            "index" => Ok(Action::Index),
            "dropIndex" => Ok(Action::DropIndex),
            "bulk" => Ok(Action::Bulk),
            "pipeline" => Ok(Action::Pipeline),
            "transaction" => Ok(Action::Transaction),
            "createCollection" => Ok(Action::CreateCollection),
            "renameCollection" => Ok(Action::RenameCollection),
            "dropCollection" => Ok(Action::DropCollection),
            "createTimeseries" => Ok(Action::CreateTimeseries),
            other => Err(ServiceError::InvalidRequest(format!(
                "invalid action {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_spelling_round_trips() {
        let actions = [
            Action::Create,
            Action::Retrieve,
            Action::Update,
            Action::Delete,
            Action::Count,
            Action::Distinct,
            Action::Index,
            Action::DropIndex,
            Action::Bulk,
            Action::Pipeline,
            Action::Transaction,
            Action::CreateCollection,
            Action::RenameCollection,
            Action::DropCollection,
            Action::CreateTimeseries,
        ];
        for action in actions {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn delete_uses_the_plain_spelling() {
        assert_eq!(Action::Delete.as_str(), "delete");
    }

    #[test]
    fn unknown_actions_are_rejected() {
        assert!("remove".parse::<Action>().is_err());
        assert!("".parse::<Action>().is_err());
    }
}
