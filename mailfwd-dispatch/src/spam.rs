//! Handling of the receiving service's scanner verdicts
//!
//! Scanning itself happens upstream. This only decides whether a message the
//! scanner failed is still forwarded. The gate runs after validation and
//! before resolution, so dropped mail never reaches an invoker.

use serde::{Deserialize, Serialize};

use crate::{envelope::Verdict, types::InboundEmailEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpamPolicy {
    /// Forward regardless of verdicts
    #[default]
    Disabled,
    /// Drop mail whose spam or virus verdict is `FAIL`
    DropBeforeDispatch,
}

impl SpamPolicy {
    /// Why `event` should be dropped, if it should
    #[must_use]
    pub fn drop_reason(self, event: &InboundEmailEvent) -> Option<&'static str> {
        match self {
            Self::Disabled => None,
            Self::DropBeforeDispatch => {
                if event.virus_verdict == Some(Verdict::Fail) {
                    Some("virus verdict FAIL")
                } else if event.spam_verdict == Some(Verdict::Fail) {
                    Some("spam verdict FAIL")
                } else {
                    None
                }
            }
        }
    }
}
