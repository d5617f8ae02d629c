//! Typed extraction of the aggregated field from JSON readings
//!
//! A reading is any JSON object carrying a device identifier and, optionally,
//! the numeric field being aggregated. All other fields pass through untouched.

use super::types::AggregateResult;
use serde_json::Value;

/// Device id and value pulled out of a reading
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReading {
    pub device_id: String,
    /// `None` when the field is missing, null, non-numeric or non-finite
    pub value: Option<f64>,
}

/// Describes one aggregate kind: which field to read and where to write the sum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateField {
    pub device_field: String,
    pub value_field: String,
    pub sum_field: String,
}

impl Default for AggregateField {
    /// Temperature readings: `tmp` summed into `tmpsum`, keyed by `device`
    fn default() -> Self {
        Self::new("device", "tmp", "tmpsum")
    }
}

impl AggregateField {
    pub fn new(
        device_field: impl Into<String>,
        value_field: impl Into<String>,
        sum_field: impl Into<String>,
    ) -> Self {
        Self {
            device_field: device_field.into(),
            value_field: value_field.into(),
            sum_field: sum_field.into(),
        }
    }

    /// Returns `None` if the reading is not an object or has no usable device id
    pub fn extract(&self, reading: &Value) -> Option<ExtractedReading> {
        let object = reading.as_object()?;

        let device_id = object
            .get(&self.device_field)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())?;

        let value = object
            .get(&self.value_field)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite());

        Some(ExtractedReading {
            device_id: device_id.to_string(),
            value,
        })
    }

    /// Write the aggregate into the reading's sum field
    ///
    /// Non-object readings are left as they are. A sum that overflowed to
    /// infinity has no JSON number form and is not attached.
    pub fn attach(&self, reading: &mut Value, result: &AggregateResult) -> bool {
        if !result.sum.is_finite() {
            log::warn!(
                "⚠️  Sum for {} overflowed, leaving '{}' unset",
                result.device_id,
                self.sum_field
            );
            return false;
        }

        match reading.as_object_mut() {
            Some(object) => {
                object.insert(self.sum_field.clone(), Value::from(result.sum));
                true
            }
            None => false,
        }
    }
}
