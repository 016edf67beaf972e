use std::sync::OnceLock;

use regex::Regex;

use crate::{sol_to_lamports, PolicyAction, Protocol};

const SWAP_INTENT_PATTERN: &str = r"(?i)swap\s+([0-9]*\.?[0-9]+)\s+sol\s+to\s+([a-z0-9]+)";

#[derive(Debug, Clone, PartialEq)]
/// A `swap <amount> sol to <token>` request recognized in free text.
pub struct ParsedSwapIntent {
    pub amount_sol: f64,
    pub amount_lamports: u64,
    pub from_token: &'static str,
    pub to_token: String,
    pub protocol: Protocol,
}

impl ParsedSwapIntent {
    pub fn to_action(&self) -> PolicyAction {
        PolicyAction {
            amount_lamports: self.amount_lamports,
            protocol: self.protocol,
        }
    }
}

fn swap_intent_regex() -> Option<&'static Regex> {
    static SWAP_INTENT: OnceLock<Option<Regex>> = OnceLock::new();
    SWAP_INTENT
        .get_or_init(|| Regex::new(SWAP_INTENT_PATTERN).ok())
        .as_ref()
}

pub fn parse_swap_intent(intent: &str) -> Option<ParsedSwapIntent> {
    let captures = swap_intent_regex()?.captures(intent.trim())?;
    let amount_sol: f64 = captures.get(1)?.as_str().parse().ok()?;
    if !amount_sol.is_finite() || amount_sol <= 0.0 {
        return None;
    }
    Some(ParsedSwapIntent {
        amount_sol,
        amount_lamports: sol_to_lamports(amount_sol),
        from_token: "SOL",
        to_token: captures.get(2)?.as_str().to_ascii_uppercase(),
        protocol: Protocol::Jupiter,
    })
}

#[cfg(test)]
mod tests {
    use super::parse_swap_intent;
    use crate::Protocol;

    #[test]
    fn functional_swap_intent_is_recognized_case_insensitively() {
        let parsed = parse_swap_intent("  Please SWAP 0.25 Sol to usdc now ").expect("swap");
        assert_eq!(parsed.amount_sol, 0.25);
        assert_eq!(parsed.amount_lamports, 250_000_000);
        assert_eq!(parsed.to_token, "USDC");
        assert_eq!(parsed.from_token, "SOL");
        assert_eq!(parsed.protocol, Protocol::Jupiter);
        assert_eq!(parsed.to_action().amount_lamports, 250_000_000);
    }

    #[test]
    fn unit_leading_dot_amounts_parse() {
        let parsed = parse_swap_intent("swap .5 sol to bonk").expect("swap");
        assert_eq!(parsed.amount_lamports, 500_000_000);
    }

    #[test]
    fn regression_zero_and_unrelated_intents_yield_none() {
        assert_eq!(parse_swap_intent("swap 0 sol to usdc"), None);
        assert_eq!(parse_swap_intent("stake 1 sol"), None);
        assert_eq!(parse_swap_intent("swap sol to usdc"), None);
    }
}
