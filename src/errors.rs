// =============================================================================
// Error taxonomy — typed failure categories shared by the cooldown manager,
// the execution engine, and the journal
// =============================================================================
//
// Low-level transport/exchange errors never propagate past the execution
// engine: they are classified here, turned into a synthetic REJECTED fill,
// and handed to the cooldown manager. The classification logic inspects the
// same raw adapter payload the cooldown manager consumes, so the journal and
// the cooldown manager never disagree about why an order failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    #[error("exchange filter rejected order: {0}")]
    ExchangeFilter(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("clock drift: {0}")]
    ClockDrift(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("unsupported adapter capability: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// A raw exchange failure payload, as handed to the classifier by an adapter.
/// `http_status` and `code` are the two dimensions every venue's errors key
/// off of; `message` is the free-text fallback when neither is conclusive.
#[derive(Debug, Clone, Default)]
pub struct RawFailure {
    pub http_status: Option<u16>,
    pub code: Option<i64>,
    pub message: String,
}

/// The cause-specific bucket a failure falls into. Drives both the cooldown
/// manager's base-seconds lookup and the operator hint attached to the
/// journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    RateLimit,
    Unauthorized,
    InsufficientMargin,
    MinNotional,
    FilterFail,
    Precision,
    PositionSide,
    ReduceOnly,
    WouldImmediatelyTrigger,
    Timestamp,
    MaxOpenOrders,
    Liquidation,
    Http400,
    HttpError,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Unauthorized => "unauthorized",
            Self::InsufficientMargin => "insufficient_margin",
            Self::MinNotional => "min_notional",
            Self::FilterFail => "filter_fail",
            Self::Precision => "precision",
            Self::PositionSide => "position_side",
            Self::ReduceOnly => "reduce_only",
            Self::WouldImmediatelyTrigger => "would_immediately_trigger",
            Self::Timestamp => "timestamp",
            Self::MaxOpenOrders => "max_open_orders",
            Self::Liquidation => "liquidation",
            Self::Http400 => "http400",
            Self::HttpError => "http_error",
        }
    }
}

/// Default cooldown base seconds per category, before backoff multiplication.
pub fn default_base_seconds(cat: FailureCategory) -> f64 {
    match cat {
        FailureCategory::RateLimit => 5.0,
        FailureCategory::Unauthorized => 600.0,
        FailureCategory::InsufficientMargin => 180.0,
        FailureCategory::MinNotional => 300.0,
        FailureCategory::FilterFail => 60.0,
        FailureCategory::Precision => 60.0,
        FailureCategory::PositionSide => 600.0,
        FailureCategory::ReduceOnly => 60.0,
        FailureCategory::WouldImmediatelyTrigger => 20.0,
        FailureCategory::Timestamp => 10.0,
        FailureCategory::MaxOpenOrders => 120.0,
        FailureCategory::Liquidation => 600.0,
        FailureCategory::Http400 => 30.0,
        FailureCategory::HttpError => 10.0,
    }
}

/// A short, fixed operator hint per failure category, attached to cooldown
/// journal entries so a human skimming the tape doesn't have to decode venue
/// error codes.
pub fn recommend_action(cat: FailureCategory) -> &'static str {
    match cat {
        FailureCategory::RateLimit => "exchange rate limit hit — reduce poll frequency or back off",
        FailureCategory::Unauthorized => "API key permissions or IP restriction — check credentials",
        FailureCategory::InsufficientMargin => "insufficient margin — lower leverage or entry size",
        FailureCategory::MinNotional => "order below exchange minimum notional — check auto-sizing",
        FailureCategory::FilterFail => "exchange filter rejected order — check stepSize/tickSize rounding",
        FailureCategory::Precision => "price or quantity precision rejected — check rounding",
        FailureCategory::PositionSide => "position side mismatch — check hedge-mode configuration",
        FailureCategory::ReduceOnly => "reduceOnly order rejected — position may already be flat",
        FailureCategory::WouldImmediatelyTrigger => "stop/limit price would trigger immediately — widen price",
        FailureCategory::Timestamp => "timestamp/recvWindow rejected — resync clock",
        FailureCategory::MaxOpenOrders => "too many open orders — cancel stale orders",
        FailureCategory::Liquidation => "account is in liquidation — trading paused",
        FailureCategory::Http400 => "generic bad request — inspect raw payload",
        FailureCategory::HttpError => "unclassified HTTP error from exchange",
    }
}

/// Classify a raw adapter failure into a cause-specific category.
///
/// First matching rule wins; order matters (HTTP status codes that overlap
/// multiple causes are disambiguated by the numeric exchange `code` field
/// when present, falling back to message substrings).
pub fn classify(raw: &RawFailure) -> FailureCategory {
    let msg = raw.message.to_lowercase();

    if let Some(status) = raw.http_status {
        if status == 418 || status == 429 {
            return FailureCategory::RateLimit;
        }
        if status == 401 || status == 403 {
            return FailureCategory::Unauthorized;
        }
    }

    if let Some(code) = raw.code {
        match code {
            -2015 => return FailureCategory::Unauthorized,
            -2019 => return FailureCategory::InsufficientMargin,
            -4164 => return FailureCategory::MinNotional,
            -1013 | -20204 | -20130 => return FailureCategory::FilterFail,
            -1111 => return FailureCategory::Precision,
            -4061 => return FailureCategory::PositionSide,
            -2022 | -4118 => return FailureCategory::ReduceOnly,
            -2021 => return FailureCategory::WouldImmediatelyTrigger,
            -1021 => return FailureCategory::Timestamp,
            -2025 => return FailureCategory::MaxOpenOrders,
            -2023 => return FailureCategory::Liquidation,
            _ => {}
        }
    }

    if msg.contains("insufficient") && msg.contains("margin") {
        return FailureCategory::InsufficientMargin;
    }
    if msg.contains("notional") && (msg.contains("no smaller") || msg.contains("minimum")) {
        return FailureCategory::MinNotional;
    }
    if msg.contains("filter failure") {
        return FailureCategory::FilterFail;
    }
    if msg.contains("precision") {
        return FailureCategory::Precision;
    }
    if msg.contains("position side") {
        return FailureCategory::PositionSide;
    }
    if msg.contains("reduceonly") || msg.contains("reduce only") {
        return FailureCategory::ReduceOnly;
    }
    if msg.contains("immediately trigger") {
        return FailureCategory::WouldImmediatelyTrigger;
    }
    if msg.contains("timestamp") || msg.contains("recvwindow") {
        return FailureCategory::Timestamp;
    }

    if raw.http_status == Some(400) {
        return FailureCategory::Http400;
    }

    FailureCategory::HttpError
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_by_status() {
        let raw = RawFailure { http_status: Some(429), code: None, message: String::new() };
        assert_eq!(classify(&raw), FailureCategory::RateLimit);
    }

    #[test]
    fn classifies_min_notional_by_code() {
        let raw = RawFailure { http_status: Some(400), code: Some(-4164), message: String::new() };
        assert_eq!(classify(&raw), FailureCategory::MinNotional);
    }

    #[test]
    fn classifies_insufficient_margin_by_message() {
        let raw = RawFailure {
            http_status: Some(400),
            code: None,
            message: "Insufficient Margin to place order".to_string(),
        };
        assert_eq!(classify(&raw), FailureCategory::InsufficientMargin);
    }

    #[test]
    fn falls_back_to_http400() {
        let raw = RawFailure { http_status: Some(400), code: None, message: "weird".to_string() };
        assert_eq!(classify(&raw), FailureCategory::Http400);
    }

    #[test]
    fn falls_back_to_http_error() {
        let raw = RawFailure { http_status: Some(500), code: None, message: "boom".to_string() };
        assert_eq!(classify(&raw), FailureCategory::HttpError);
    }

    #[test]
    fn unauthorized_code_wins_over_status() {
        let raw = RawFailure { http_status: Some(400), code: Some(-2015), message: String::new() };
        assert_eq!(classify(&raw), FailureCategory::Unauthorized);
    }
}
