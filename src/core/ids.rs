use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Identifier of the client that owns an order.
    ///
    /// ```
    /// use clearing_pipeline::core::ids::ClientId;
    ///
    /// let client = ClientId::new("CLIENT-001");
    /// assert_eq!(client.as_str(), "CLIENT-001");
    /// ```
    ClientId
);

string_id!(
    /// Instrument symbol, e.g. `AAPL`. Netting is scoped per symbol.
    Symbol
);

string_id!(
    /// Identifier of a simulated trading venue.
    VenueId
);

string_id!(
    /// ISO 4217-style currency code used on settlement records.
    CurrencyCode
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_equality() {
        assert_eq!(Symbol::new("AAPL"), Symbol::from("AAPL"));
        assert_ne!(VenueId::new("EXCH1"), VenueId::new("EXCH2"));
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", CurrencyCode::new("USD")), "USD");
    }

    #[test]
    fn test_blank_id_is_empty() {
        assert!(ClientId::new("  ").is_empty());
        assert!(!ClientId::new("C1").is_empty());
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&Symbol::new("MSFT")).unwrap();
        assert_eq!(json, "\"MSFT\"");
    }
}
