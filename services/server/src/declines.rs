//! Card decline codes and their human-readable messages.
//!
//! The table is deliberately wider than what processors typically return —
//! the extra codes exist for test coverage breadth. Unknown codes fall back
//! to the generic message.

pub const GENERIC_DECLINE_MESSAGE: &str = "Your card was declined.";

const DECLINE_MESSAGES: &[(&str, &str)] = &[
    ("card_declined", "Your card was declined."),
    ("generic_decline", "Your card was declined."),
    ("insufficient_funds", "Your card has insufficient funds."),
    ("lost_card", "Your card was declined."),
    ("stolen_card", "Your card was declined."),
    ("expired_card", "Your card has expired."),
    ("incorrect_cvc", "Your card's security code is incorrect."),
    ("incorrect_number", "Your card number is incorrect."),
    ("processing_error", "An error occurred while processing your card. Try again in a little bit."),
    ("fraudulent", "Your card was declined."),
    ("do_not_honor", "Your card was declined."),
    ("pickup_card", "Your card cannot be used to make this payment."),
    ("card_velocity_exceeded", "Your card was declined for making repeated attempts too frequently or exceeding its amount limit."),
];

pub fn decline_message(code: &str) -> &'static str {
    DECLINE_MESSAGES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, message)| *message)
        .unwrap_or(GENERIC_DECLINE_MESSAGE)
}

pub fn is_known_decline_code(code: &str) -> bool {
    DECLINE_MESSAGES.iter().any(|(known, _)| *known == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_resolve_specific_messages() {
        assert_eq!(
            decline_message("insufficient_funds"),
            "Your card has insufficient funds."
        );
        assert_eq!(decline_message("card_declined"), "Your card was declined.");
    }

    #[test]
    fn unknown_codes_fall_back_to_generic() {
        assert_eq!(decline_message("made_up_code"), GENERIC_DECLINE_MESSAGE);
        assert!(!is_known_decline_code("made_up_code"));
        assert!(is_known_decline_code("expired_card"));
    }
}
