use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;
use crate::error::EngineError;
use crate::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    #[serde(rename = "REVENUE")]
    Revenue,
    #[serde(rename = "COST")]
    Cost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalculationMode {
    #[serde(rename = "NPV")]
    Npv,
    #[serde(rename = "IRR")]
    Irr,
}

fn default_conversion_rate() -> f64 {
    1.0
}

/// A revenue or cost stream: either a root (driven directly by a distribution)
/// or a child (derived from a parent's non-zero months).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub name: String,
    pub kind: StreamKind,
    pub start_month: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_month: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub amount: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub unit_value: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub market_units: Option<Distribution>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub adoption_curve: Option<Distribution>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_stream_id: Option<String>,
    #[serde(default = "default_conversion_rate")]
    pub conversion_rate: f64,
    #[serde(default)]
    pub trigger_delay_months: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub periodicity_months: Option<u32>,
    #[serde(default)]
    pub amount_is_ratio: bool,
}

impl Stream {
    pub fn is_root(&self) -> bool {
        self.parent_stream_id.is_none()
    }

    /// Is this stream still active at `forecast_months - 1`, i.e. not wound down
    /// before the end of the forecast window?
    pub fn is_perpetual(&self, forecast_months: u32) -> bool {
        match self.end_month {
            None => true,
            Some(end) => end >= forecast_months,
        }
    }

    /// Last active month within the forecast window, inclusive.
    pub fn last_active_month(&self, forecast_months: u32) -> Option<u32> {
        if forecast_months == 0 {
            return None;
        }
        let cap = forecast_months - 1;
        let last = self.end_month.map_or(cap, |e| e.min(cap));
        if last < self.start_month {
            None
        } else {
            Some(last)
        }
    }

    pub(crate) fn validate_self(&self) -> EngineResult<()> {
        if let Some(end) = self.end_month {
            if end < self.start_month {
                return Err(EngineError::InvalidInput {
                    field: "end_month".into(),
                    reason: format!(
                        "end_month ({end}) must be >= start_month ({})",
                        self.start_month
                    ),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.conversion_rate) {
            return Err(EngineError::InvalidInput {
                field: "conversion_rate".into(),
                reason: format!("conversion_rate must be within [0, 1], got {}", self.conversion_rate),
            });
        }
        if self.is_root() && self.amount.is_none() && (self.unit_value.is_none() || self.market_units.is_none()) {
            return Err(EngineError::InvalidInput {
                field: "amount".into(),
                reason: "root stream requires either `amount` or both `unit_value` and `market_units`".into(),
            });
        }
        for dist in [
            &self.amount,
            &self.unit_value,
            &self.market_units,
            &self.adoption_curve,
        ]
        .into_iter()
        .flatten()
        {
            dist.validate()?;
        }
        Ok(())
    }
}

/// Forecast-wide assumptions that apply across every stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub forecast_months: u32,
    pub discount_rate: Distribution,
    pub terminal_growth_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub escalation_rate: Option<Distribution>,
    pub calculation_mode: CalculationMode,
}

/// Version tag and timestamps attached to a saved model document; purely
/// informational, never required on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<String>,
}

/// The on-disk/wire shape of a model: what `load`/`save` round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDocument {
    pub name: String,
    pub settings: ModelSettings,
    pub streams: Vec<Stream>,
    #[serde(rename = "_metadata", skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<DocumentMetadata>,
}

/// In-memory graph of streams plus settings. Streams are kept in insertion
/// order; that order is the one `get_execution_order` is stable with respect to.
#[derive(Debug, Clone)]
pub struct FinancialModel {
    pub name: String,
    pub settings: ModelSettings,
    streams: Vec<Stream>,
}

impl FinancialModel {
    pub fn new(name: impl Into<String>, settings: ModelSettings) -> Self {
        FinancialModel {
            name: name.into(),
            settings,
            streams: Vec::new(),
        }
    }

    pub fn from_document(doc: ModelDocument) -> EngineResult<Self> {
        let mut model = FinancialModel::new(doc.name, doc.settings);
        for stream in doc.streams {
            model.add_stream(stream)?;
        }
        Ok(model)
    }

    pub fn to_document(&self) -> ModelDocument {
        ModelDocument {
            name: self.name.clone(),
            settings: self.settings.clone(),
            streams: self.streams.clone(),
            metadata: Some(DocumentMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                created_at: None,
                updated_at: None,
            }),
        }
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn get_stream(&self, id: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.streams.iter().position(|s| s.id == id)
    }

    pub fn add_stream(&mut self, stream: Stream) -> EngineResult<()> {
        if self.position(&stream.id).is_some() {
            return Err(EngineError::GraphError(format!(
                "duplicate stream id '{}'",
                stream.id
            )));
        }
        if let Some(parent_id) = &stream.parent_stream_id {
            if self.get_stream(parent_id).is_none() {
                return Err(EngineError::GraphError(format!(
                    "stream '{}' references unknown parent '{parent_id}'",
                    stream.id
                )));
            }
        }
        stream.validate_self()?;
        if self.would_create_cycle(&stream.id, stream.parent_stream_id.as_deref()) {
            return Err(EngineError::GraphError(format!(
                "adding stream '{}' would create a cycle",
                stream.id
            )));
        }
        self.streams.push(stream);
        Ok(())
    }

    pub fn update_stream(&mut self, id: &str, stream: Stream) -> EngineResult<()> {
        let idx = self
            .position(id)
            .ok_or_else(|| EngineError::GraphError(format!("stream '{id}' not found")))?;
        if stream.id != id {
            return Err(EngineError::InvalidInput {
                field: "id".into(),
                reason: "update_stream cannot change a stream's id".into(),
            });
        }
        if let Some(parent_id) = &stream.parent_stream_id {
            if parent_id == id {
                return Err(EngineError::GraphError(format!(
                    "stream '{id}' cannot be its own parent"
                )));
            }
            if self.get_stream(parent_id).is_none() {
                return Err(EngineError::GraphError(format!(
                    "stream '{id}' references unknown parent '{parent_id}'"
                )));
            }
        }
        stream.validate_self()?;
        if self.would_create_cycle(id, stream.parent_stream_id.as_deref()) {
            return Err(EngineError::GraphError(format!(
                "updating stream '{id}' would create a cycle"
            )));
        }
        self.streams[idx] = stream;
        Ok(())
    }

    pub fn remove_stream(&mut self, id: &str) -> EngineResult<()> {
        let idx = self
            .position(id)
            .ok_or_else(|| EngineError::GraphError(format!("stream '{id}' not found")))?;
        self.streams.remove(idx);
        for child in self.streams.iter_mut() {
            if child.parent_stream_id.as_deref() == Some(id) {
                child.parent_stream_id = None;
            }
        }
        Ok(())
    }

    pub fn get_children(&self, id: &str) -> Vec<&Stream> {
        self.streams
            .iter()
            .filter(|s| s.parent_stream_id.as_deref() == Some(id))
            .collect()
    }

    /// Would setting `id`'s parent to `new_parent` create a cycle? Walks the
    /// ancestry of `new_parent` looking for `id`.
    fn would_create_cycle(&self, id: &str, new_parent: Option<&str>) -> bool {
        let mut current = new_parent.map(|s| s.to_string());
        let mut seen = HashSet::new();
        while let Some(cur) = current {
            if cur == id {
                return true;
            }
            if !seen.insert(cur.clone()) {
                // Pre-existing cycle elsewhere in the graph; not this call's concern.
                return false;
            }
            current = self
                .get_stream(&cur)
                .and_then(|s| s.parent_stream_id.clone());
        }
        false
    }

    /// Kahn-style topological order, stable with respect to insertion order.
    pub fn get_execution_order(&self) -> Vec<String> {
        let mut emitted: HashSet<String> = HashSet::new();
        let mut order = Vec::with_capacity(self.streams.len());
        while order.len() < self.streams.len() {
            let mut progressed = false;
            for stream in &self.streams {
                if emitted.contains(&stream.id) {
                    continue;
                }
                let ready = match &stream.parent_stream_id {
                    None => true,
                    Some(parent) => emitted.contains(parent),
                };
                if ready {
                    emitted.insert(stream.id.clone());
                    order.push(stream.id.clone());
                    progressed = true;
                }
            }
            if !progressed {
                // A cycle slipped past validate(); stop rather than loop forever.
                break;
            }
        }
        order
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.settings.forecast_months < 2 {
            return Err(EngineError::InsufficientData(format!(
                "forecast_months must be >= 2 to produce a usable cashflow vector, got {}",
                self.settings.forecast_months
            )));
        }
        for stream in &self.streams {
            stream.validate_self()?;
            if let Some(parent_id) = &stream.parent_stream_id {
                if self.get_stream(parent_id).is_none() {
                    return Err(EngineError::GraphError(format!(
                        "stream '{}' references unknown parent '{parent_id}'",
                        stream.id
                    )));
                }
            }
        }
        self.settings.discount_rate.validate()?;
        if let Some(esc) = &self.settings.escalation_rate {
            esc.validate()?;
        }
        for stream in &self.streams {
            if self.has_cycle_from(&stream.id) {
                return Err(EngineError::GraphError(format!(
                    "cycle detected involving stream '{}'",
                    stream.id
                )));
            }
        }
        if self.settings.calculation_mode == CalculationMode::Npv {
            let expected_discount = self.settings.discount_rate.deterministic();
            if expected_discount <= self.settings.terminal_growth_rate {
                return Err(EngineError::ValuationPrecondition(format!(
                    "NPV mode requires E[discount_rate] ({expected_discount}) > terminal_growth_rate ({})",
                    self.settings.terminal_growth_rate
                )));
            }
        }
        Ok(())
    }

    fn has_cycle_from(&self, start: &str) -> bool {
        let mut current = Some(start.to_string());
        let mut seen = HashSet::new();
        while let Some(cur) = current {
            if !seen.insert(cur.clone()) {
                return true;
            }
            current = self
                .get_stream(&cur)
                .and_then(|s| s.parent_stream_id.clone());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Distribution;

    fn settings(mode: CalculationMode) -> ModelSettings {
        ModelSettings {
            forecast_months: 12,
            discount_rate: Distribution::Fixed { value: 0.12 },
            terminal_growth_rate: 0.0,
            escalation_rate: None,
            calculation_mode: mode,
        }
    }

    fn root_stream(id: &str) -> Stream {
        Stream {
            id: id.to_string(),
            name: id.to_string(),
            kind: StreamKind::Revenue,
            start_month: 0,
            end_month: Some(11),
            amount: Some(Distribution::Fixed { value: 1000.0 }),
            unit_value: None,
            market_units: None,
            adoption_curve: None,
            parent_stream_id: None,
            conversion_rate: 1.0,
            trigger_delay_months: 0,
            periodicity_months: None,
            amount_is_ratio: false,
        }
    }

    #[test]
    fn add_stream_rejects_duplicate_id() {
        let mut model = FinancialModel::new("m", settings(CalculationMode::Npv));
        model.add_stream(root_stream("a")).unwrap();
        let err = model.add_stream(root_stream("a")).unwrap_err();
        assert!(matches!(err, EngineError::GraphError(_)));
    }

    #[test]
    fn add_stream_rejects_dangling_parent() {
        let mut model = FinancialModel::new("m", settings(CalculationMode::Npv));
        let mut child = root_stream("child");
        child.parent_stream_id = Some("ghost".into());
        assert!(model.add_stream(child).is_err());
    }

    #[test]
    fn remove_stream_reparents_children_to_root() {
        let mut model = FinancialModel::new("m", settings(CalculationMode::Npv));
        model.add_stream(root_stream("parent")).unwrap();
        let mut child = root_stream("child");
        child.parent_stream_id = Some("parent".into());
        model.add_stream(child).unwrap();

        model.remove_stream("parent").unwrap();
        assert!(model.get_stream("child").unwrap().parent_stream_id.is_none());
    }

    #[test]
    fn execution_order_places_parent_before_child() {
        let mut model = FinancialModel::new("m", settings(CalculationMode::Npv));
        model.add_stream(root_stream("parent")).unwrap();
        let mut child = root_stream("child");
        child.parent_stream_id = Some("parent".into());
        model.add_stream(child).unwrap();

        let order = model.get_execution_order();
        let parent_pos = order.iter().position(|id| id == "parent").unwrap();
        let child_pos = order.iter().position(|id| id == "child").unwrap();
        assert!(parent_pos < child_pos);
    }

    #[test]
    fn execution_order_is_stable_among_roots() {
        let mut model = FinancialModel::new("m", settings(CalculationMode::Npv));
        model.add_stream(root_stream("b")).unwrap();
        model.add_stream(root_stream("a")).unwrap();
        assert_eq!(model.get_execution_order(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn update_stream_detects_new_cycle() {
        let mut model = FinancialModel::new("m", settings(CalculationMode::Npv));
        model.add_stream(root_stream("a")).unwrap();
        let mut b = root_stream("b");
        b.parent_stream_id = Some("a".into());
        model.add_stream(b).unwrap();

        let mut a_as_child_of_b = root_stream("a");
        a_as_child_of_b.parent_stream_id = Some("b".into());
        assert!(model.update_stream("a", a_as_child_of_b).is_err());
    }

    #[test]
    fn validate_rejects_npv_mode_with_inverted_discount_growth() {
        let mut settings = settings(CalculationMode::Npv);
        settings.discount_rate = Distribution::Fixed { value: 0.01 };
        settings.terminal_growth_rate = 0.05;
        let model = FinancialModel::new("m", settings);
        assert!(model.validate().is_err());
    }

    #[test]
    fn validate_rejects_forecast_months_too_short_for_payback() {
        let mut settings = settings(CalculationMode::Npv);
        settings.forecast_months = 1;
        let model = FinancialModel::new("m", settings);
        let err = model.validate().unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn validate_skips_discount_check_in_irr_mode() {
        let mut settings = settings(CalculationMode::Irr);
        settings.discount_rate = Distribution::Fixed { value: 0.0 };
        settings.terminal_growth_rate = 0.5;
        let model = FinancialModel::new("m", settings);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn document_round_trip_preserves_streams() {
        let mut model = FinancialModel::new("m", settings(CalculationMode::Npv));
        model.add_stream(root_stream("a")).unwrap();
        let doc = model.to_document();
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: ModelDocument = serde_json::from_str(&json).unwrap();
        let restored = FinancialModel::from_document(parsed).unwrap();
        assert_eq!(restored.streams().len(), 1);
        assert_eq!(restored.streams()[0].id, "a");
    }

    #[test]
    fn unknown_and_comment_fields_are_ignored_on_load() {
        let json = serde_json::json!({
            "name": "m",
            "_comment": "hand-edited",
            "unexpected_field": 123,
            "settings": {
                "forecast_months": 12,
                "discount_rate": {"kind": "FIXED", "params": {"value": 0.1}},
                "terminal_growth_rate": 0.0,
                "calculation_mode": "NPV"
            },
            "streams": []
        });
        let doc: ModelDocument = serde_json::from_value(json).unwrap();
        assert_eq!(doc.name, "m");
    }
}
