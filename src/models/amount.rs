//! Serde helpers for exact-precision amounts.
//!
//! Amounts travel as decimal strings so they survive JSON consumers that
//! would otherwise round large integers. Plain JSON integers are accepted on
//! input for convenience.

use ethnum::U256;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Text(String),
    Number(u64),
}

pub fn parse(text: &str) -> Result<U256, String> {
    U256::from_str_radix(text.trim(), 10).map_err(|e| format!("invalid amount {text:?}: {e}"))
}

pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    match RawAmount::deserialize(deserializer)? {
        RawAmount::Text(text) => parse(&text).map_err(D::Error::custom),
        RawAmount::Number(n) => Ok(U256::from(n)),
    }
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        match Option::<RawAmount>::deserialize(deserializer)? {
            Some(RawAmount::Text(text)) => parse(&text).map(Some).map_err(D::Error::custom),
            Some(RawAmount::Number(n)) => Ok(Some(U256::from(n))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        amount: U256,
        #[serde(default, with = "super::option")]
        cap: Option<U256>,
    }

    #[test]
    fn accepts_strings_and_numbers() {
        let h: Holder =
            serde_json::from_str(r#"{"amount":"340282366920938463463374607431768211456","cap":5}"#)
                .unwrap();
        assert_eq!(h.amount, U256::from(u128::MAX) + U256::ONE);
        assert_eq!(h.cap, Some(U256::from(5u8)));

        let h: Holder = serde_json::from_str(r#"{"amount":12}"#).unwrap();
        assert_eq!(h.amount, U256::from(12u8));
        assert_eq!(h.cap, None);
    }

    #[test]
    fn serializes_as_decimal_string() {
        let h = Holder {
            amount: U256::from(1000u32),
            cap: None,
        };
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["amount"], "1000");
        assert!(json["cap"].is_null());
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Holder>(r#"{"amount":"12abc"}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"amount":"-5"}"#).is_err());
    }
}
