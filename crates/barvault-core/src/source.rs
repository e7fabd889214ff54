use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Upstream providers barvault knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Alpaca,
    Yahoo,
}

impl ProviderId {
    /// Default fallback order.
    pub const ALL: [Self; 2] = [Self::Alpaca, Self::Yahoo];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alpaca => "alpaca",
            Self::Yahoo => "yahoo",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "alpaca" => Ok(Self::Alpaca),
            "yahoo" => Ok(Self::Yahoo),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}

/// Parses a comma separated provider order such as `alpaca,yahoo`.
pub fn parse_provider_order(value: &str) -> Result<Vec<ProviderId>, ValidationError> {
    let mut order = Vec::new();
    for token in value.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        let provider = token.parse::<ProviderId>()?;
        if !order.contains(&provider) {
            order.push(provider);
        }
    }
    if order.is_empty() {
        return Err(ValidationError::InvalidSource {
            value: value.to_owned(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Yahoo".parse::<ProviderId>().expect("yahoo"), ProviderId::Yahoo);
        assert!(matches!(
            "polygon".parse::<ProviderId>(),
            Err(ValidationError::InvalidSource { .. })
        ));
    }

    #[test]
    fn provider_order_dedups() {
        let order = parse_provider_order("yahoo, alpaca,yahoo").expect("order");
        assert_eq!(order, vec![ProviderId::Yahoo, ProviderId::Alpaca]);
        assert!(parse_provider_order(" , ").is_err());
    }
}
