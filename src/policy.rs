//! Security policy evaluation and propagation messaging
//!
//! When a user carries a propagating policy, its obligations extend to
//! co-owners once an ownership request is accepted. Before an owner is added
//! the affected parties are shown a disclosure message, composed from three
//! mutually exclusive tiers evaluated in fixed priority order:
//!
//! 1. the candidate itself propagates a policy,
//! 2. a current owner propagates a policy,
//! 3. a pending (not-yet-confirmed) owner other than the candidate does.
//!
//! If the candidate is already subscribed to the policy's target
//! subscription the disclosure is suppressed entirely.

use crate::models::SecurityPolicy;

/// Policy whose requirements propagate to co-owners
pub const REQUIRE_SECURE_PUSH_FOR_CO_OWNERS: &str = "RequireSecurePushForCoOwners";

/// Subscription enforced on co-owners by the propagating policy. A candidate
/// already subscribed to it has nothing new to disclose.
pub const SECURE_PUSH_SUBSCRIPTION: &str = "SecurePush";

/// The propagating policy as attached to a subscribing user
pub fn secure_push_for_co_owners() -> SecurityPolicy {
    SecurityPolicy {
        name: REQUIRE_SECURE_PUSH_FOR_CO_OWNERS.to_string(),
        subscription: "SecurePushForCoOwners".to_string(),
    }
}

pub fn is_propagating(policy: &SecurityPolicy) -> bool {
    policy.name == REQUIRE_SECURE_PUSH_FOR_CO_OWNERS
}

fn requirement_text(policy: &SecurityPolicy) -> Option<&'static str> {
    match policy.name.as_str() {
        REQUIRE_SECURE_PUSH_FOR_CO_OWNERS => Some(
            "Packages must be pushed over an encrypted channel using an API key scoped to the package.",
        ),
        _ => None,
    }
}

/// Where the composed message will be shown. The tiering is identical; only
/// the lead-in phrasing differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageContext {
    /// The UI confirmation dialog shown to the acting owner
    Preview,
    /// The body of the ownership-request email sent to the candidate
    Email,
}

/// Everything the tiering needs to know, gathered by the workflow engine.
/// `pending_owners` must not include the candidate.
#[derive(Debug, Clone, Default)]
pub struct PropagationInputs {
    pub candidate: String,
    pub candidate_policies: Vec<SecurityPolicy>,
    pub candidate_subscribed: bool,
    pub owners: Vec<(String, Vec<SecurityPolicy>)>,
    pub pending_owners: Vec<(String, Vec<SecurityPolicy>)>,
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Candidate,
    CurrentOwners,
    PendingOwners,
}

// Priority order is part of the contract: a candidate-propagated policy
// masks owner-propagated and pending-propagated messages.
const TIER_ORDER: [Tier; 3] = [Tier::Candidate, Tier::CurrentOwners, Tier::PendingOwners];

impl Tier {
    /// Names of users whose propagating policies trigger this tier, plus the
    /// requirement descriptions to disclose. `None` when the tier does not
    /// apply.
    fn evaluate(&self, inputs: &PropagationInputs) -> Option<(Vec<String>, String)> {
        let from = |entries: &[(String, Vec<SecurityPolicy>)]| {
            let mut names = Vec::new();
            let mut descriptions = Vec::new();
            for (name, policies) in entries {
                let texts: Vec<&str> = policies
                    .iter()
                    .filter(|p| is_propagating(p))
                    .filter_map(requirement_text)
                    .collect();
                if !texts.is_empty() {
                    names.push(name.clone());
                    for text in texts {
                        if !descriptions.contains(&text) {
                            descriptions.push(text);
                        }
                    }
                }
            }
            if names.is_empty() {
                None
            } else {
                Some((names, descriptions.join(" ")))
            }
        };

        match self {
            Tier::Candidate => from(&[(
                inputs.candidate.clone(),
                inputs.candidate_policies.clone(),
            )]),
            Tier::CurrentOwners => from(&inputs.owners),
            Tier::PendingOwners => from(&inputs.pending_owners),
        }
    }

    fn render(&self, context: MessageContext, inputs: &PropagationInputs, names: &[String], descriptions: &str) -> String {
        let candidate = &inputs.candidate;
        let names = names.join(", ");
        match (self, context) {
            (Tier::Candidate, MessageContext::Preview) => format!(
                "User '{}' has the following requirements that will be enforced for all co-owners once the user accepts ownership of this package: {}",
                candidate, descriptions
            ),
            (Tier::CurrentOwners, MessageContext::Preview) => format!(
                "Owner(s) '{}' has (have) the following requirements that will be enforced for user '{}' once the user accepts ownership of this package: {}",
                names, candidate, descriptions
            ),
            (Tier::PendingOwners, MessageContext::Preview) => format!(
                "Pending owner(s) '{}' has (have) the following requirements that will be enforced for all co-owners, including '{}', once ownership requests are accepted: {}",
                names, candidate, descriptions
            ),
            (Tier::Candidate, MessageContext::Email) => format!(
                "Note: The following policies will be enforced on package co-owners once you accept this request. {}",
                descriptions
            ),
            (Tier::CurrentOwners, MessageContext::Email) => format!(
                "Note: Owner(s) '{}' has (have) the following policies that will be enforced on your account once you accept this request. {}",
                names, descriptions
            ),
            (Tier::PendingOwners, MessageContext::Email) => format!(
                "Note: Pending owner(s) '{}' has (have) the following policies that will be enforced on your account once ownership requests are accepted. {}",
                names, descriptions
            ),
        }
    }
}

/// Compose the policy disclosure for an add-owner operation, or `None` when
/// there is nothing to disclose.
pub fn compose_policy_message(
    inputs: &PropagationInputs,
    context: MessageContext,
) -> Option<String> {
    if inputs.candidate_subscribed {
        return None;
    }

    for tier in TIER_ORDER {
        if let Some((names, descriptions)) = tier.evaluate(inputs) {
            return Some(tier.render(context, inputs, &names, &descriptions));
        }
    }

    None
}
