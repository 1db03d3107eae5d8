//! Approval status resolution.
//!
//! Total over its input: anything the tables do not recognize resolves to
//! `Pending`, so malformed backend data never hides a request.

use super::types::{ApprovalState, RequestKind};

/// Staff response codes (Advance, Document).
const STAFF_CODES: &[(&str, ApprovalState)] = &[
  ("T", ApprovalState::Approved),
  ("N", ApprovalState::Rejected),
  ("I", ApprovalState::Pending),
];

/// First approval-chain step codes (Authorization, Leave, Training).
const CHAIN_CODES: &[(&str, ApprovalState)] = &[
  ("O", ApprovalState::Approved),
  ("N", ApprovalState::Rejected),
  ("I", ApprovalState::Pending),
];

/// Resolve the approval state for a kind from its raw response code.
///
/// For chain-based kinds `code` is `chainResponse.step1`; later steps are
/// not consulted.
pub fn resolve(kind: RequestKind, code: Option<&str>) -> ApprovalState {
  let table = if kind.uses_staff_response() {
    STAFF_CODES
  } else {
    CHAIN_CODES
  };

  let code = match code {
    Some(c) => c.trim().to_uppercase(),
    None => return ApprovalState::Pending,
  };

  table
    .iter()
    .find(|(raw, _)| *raw == code)
    .map(|(_, state)| *state)
    .unwrap_or(ApprovalState::Pending)
}
