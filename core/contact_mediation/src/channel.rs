//! WhatsApp handle normalisation and suggested first messages.
//!
//! Stored numbers are free text typed by users (`"07 12 34 56"`,
//! `"+225-0712345678"`). Before a number leaves the disclosure gateway it is
//! reduced to `+<digits>`.

use crate::errors::{MediationError, Result};

/// Shortest digit run accepted as a phone number.
pub const MIN_PHONE_DIGITS: usize = 8;

/// Marketplace name used in message templates.
pub const PLATFORM_NAME: &str = "AgroConnect";

/// Strip everything except digits and a leading `+`, then ensure the `+`.
pub fn normalize_whatsapp(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(MediationError::Validation(format!(
            "whatsapp number must contain at least {MIN_PHONE_DIGITS} digits"
        )));
    }
    Ok(format!("+{digits}"))
}

/// Message a buyer sends to a producer once disclosure is granted.
pub fn buyer_greeting(producer_first_name: &str, listing_name: &str) -> String {
    format!(
        "Bonjour {producer_first_name},\n\nJe suis intéressé(e) par votre produit \"{listing_name}\" \
         que j'ai vu sur {PLATFORM_NAME}. Pourriez-vous me donner plus d'informations ?\n\nMerci !"
    )
}

/// Message a producer sends back to a buyer after accepting their request.
pub fn producer_greeting(buyer_display_name: &str) -> String {
    format!(
        "Bonjour {buyer_display_name},\n\nJ'ai bien reçu votre demande de contact sur \
         {PLATFORM_NAME}. Je suis disponible pour discuter de mes produits.\n\nMerci !"
    )
}
