//! Lossless JSON encoding for floats.
//!
//! JSON has no NaN or infinity: `serde_json` writes them as `null` and then
//! refuses to read them back. Fields routed through this module keep finite
//! values as plain numbers and write the rest as `"NaN"`, `"inf"` or `"-inf"`,
//! so a diverged run still saves files that load again.
//!
//! ```ignore
//! #[serde(with = "tonet_core::float::scalar")]
//! pub val_loss: f64,
//! ```

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Float types with a lossless JSON form.
pub trait JsonFloat: Copy + Serialize + DeserializeOwned {
    const NAN: Self;
    const INFINITY: Self;
    const NEG_INFINITY: Self;

    /// Text form for NaN and the infinities, `None` for finite values.
    fn non_finite_label(self) -> Option<&'static str>;
}

macro_rules! json_float {
    ($($ty:ty),*) => {$(
        impl JsonFloat for $ty {
            const NAN: Self = <$ty>::NAN;
            const INFINITY: Self = <$ty>::INFINITY;
            const NEG_INFINITY: Self = <$ty>::NEG_INFINITY;

            fn non_finite_label(self) -> Option<&'static str> {
                if self.is_nan() {
                    Some("NaN")
                } else if self == <$ty>::INFINITY {
                    Some("inf")
                } else if self == <$ty>::NEG_INFINITY {
                    Some("-inf")
                } else {
                    None
                }
            }
        }
    )*};
}

json_float!(f32, f64);

/// A single float in its lossless form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lossless<T>(pub T);

impl<T: JsonFloat> Serialize for Lossless<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.non_finite_label() {
            Some(label) => serializer.serialize_str(label),
            None => self.0.serialize(serializer),
        }
    }
}

impl<'de, T: JsonFloat> Deserialize<'de> for Lossless<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumberOrText<N> {
            Number(N),
            Text(String),
        }

        match NumberOrText::<T>::deserialize(deserializer)? {
            NumberOrText::Number(value) => Ok(Lossless(value)),
            NumberOrText::Text(text) => match text.as_str() {
                "NaN" => Ok(Lossless(T::NAN)),
                "inf" => Ok(Lossless(T::INFINITY)),
                "-inf" => Ok(Lossless(T::NEG_INFINITY)),
                other => Err(D::Error::custom(format!(
                    "expected a number, \"NaN\", \"inf\" or \"-inf\", got '{other}'"
                ))),
            },
        }
    }
}

/// `#[serde(with = "tonet_core::float::scalar")]` for a single float field.
pub mod scalar {
    use super::{JsonFloat, Lossless};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: JsonFloat, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        Lossless(*value).serialize(serializer)
    }

    pub fn deserialize<'de, T: JsonFloat, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        Lossless::<T>::deserialize(deserializer).map(|v| v.0)
    }
}

/// `#[serde(with = "tonet_core::float::seq")]` for a `Vec` of floats.
pub mod seq {
    use super::{JsonFloat, Lossless};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ptr_arg)]
    pub fn serialize<T: JsonFloat, S: Serializer>(
        values: &Vec<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|&v| Lossless(v)))
    }

    pub fn deserialize<'de, T: JsonFloat, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<T>, D::Error> {
        let values = Vec::<Lossless<T>>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|v| v.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "scalar")]
        loss: f64,
        #[serde(with = "seq")]
        values: Vec<f32>,
    }

    #[test]
    fn test_non_finite_written_as_text() {
        let sample = Sample {
            loss: f64::NAN,
            values: vec![1.5, f32::INFINITY, f32::NEG_INFINITY, -0.25],
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"loss":"NaN","values":[1.5,"inf","-inf",-0.25]}"#);

        let back: Sample = serde_json::from_str(&json).unwrap();
        assert!(back.loss.is_nan());
        assert_eq!(back.values[1], f32::INFINITY);
        assert_eq!(back.values[2], f32::NEG_INFINITY);
        assert_eq!(back.values[3], -0.25);
    }

    #[test]
    fn test_finite_values_stay_numbers() {
        let json = r#"{"loss":2,"values":[0.1,3]}"#;
        let sample: Sample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.loss, 2.0);
        assert_eq!(sample.values, vec![0.1, 3.0]);
        assert_eq!(
            serde_json::to_string(&sample).unwrap(),
            r#"{"loss":2.0,"values":[0.1,3.0]}"#
        );
    }

    #[test]
    fn test_unknown_text_rejected() {
        let err = serde_json::from_str::<Sample>(r#"{"loss":"lots","values":[]}"#).unwrap_err();
        assert!(err.to_string().contains("lots"));
        assert!(serde_json::from_str::<Sample>(r#"{"loss":null,"values":[]}"#).is_err());
    }
}
