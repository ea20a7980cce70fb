/// Shared types used across the codebase
///
/// Enumerations are persisted as TEXT columns holding the upper-case name,
/// so each one round-trips through `&str` for both sqlx and serde.
use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("Unknown {}: {}", stringify!($name), other)),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(&self, buf: &mut sqlx::postgres::PgArgumentBuffer) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
                text.parse::<$name>().map_err(Into::into)
            }
        }
    };
}

text_enum! {
    /// Connectivity state of a device
    pub enum DeviceStatus {
        Online => "ONLINE",
        Offline => "OFFLINE",
        Unknown => "UNKNOWN",
    }
}

text_enum! {
    pub enum DataType {
        Number => "NUMBER",
        Boolean => "BOOLEAN",
        String => "STRING",
        Json => "JSON",
    }
}

text_enum! {
    /// Where a variable definition came from
    pub enum DataSource {
        Manual => "MANUAL",
        Auto => "AUTO",
        Synthetic => "SYNTHETIC",
    }
}

text_enum! {
    pub enum RuleOperator {
        Gt => "GT",
        Gte => "GTE",
        Lt => "LT",
        Lte => "LTE",
        Eq => "EQ",
    }
}

impl RuleOperator {
    pub fn evaluate(&self, actual: f64, threshold: f64) -> bool {
        match self {
            RuleOperator::Gt => actual > threshold,
            RuleOperator::Gte => actual >= threshold,
            RuleOperator::Lt => actual < threshold,
            RuleOperator::Lte => actual <= threshold,
            RuleOperator::Eq => actual == threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            RuleOperator::Gt => ">",
            RuleOperator::Gte => ">=",
            RuleOperator::Lt => "<",
            RuleOperator::Lte => "<=",
            RuleOperator::Eq => "=",
        }
    }
}

text_enum! {
    pub enum AlertSeverity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

impl AlertSeverity {
    /// Severity grows with the relative distance from the threshold.
    pub fn from_deviation(actual: f64, threshold: f64) -> Self {
        let scale = threshold.abs();
        if scale == 0.0 {
            return AlertSeverity::Medium;
        }
        let ratio = (actual - threshold).abs() / scale;
        if ratio > 2.0 {
            AlertSeverity::Critical
        } else if ratio > 1.0 {
            AlertSeverity::High
        } else if ratio > 0.5 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }

    pub fn event_severity(&self) -> EventSeverity {
        match self {
            AlertSeverity::Critical => EventSeverity::Critical,
            AlertSeverity::High => EventSeverity::Error,
            AlertSeverity::Medium => EventSeverity::Warning,
            AlertSeverity::Low => EventSeverity::Info,
        }
    }
}

text_enum! {
    pub enum EventType {
        DeviceCreated => "DEVICE_CREATED",
        DeviceUpdated => "DEVICE_UPDATED",
        DeviceDeleted => "DEVICE_DELETED",
        DeviceConnected => "DEVICE_CONNECTED",
        DeviceOffline => "DEVICE_OFFLINE",
        RuleCreated => "RULE_CREATED",
        RuleUpdated => "RULE_UPDATED",
        RuleDeleted => "RULE_DELETED",
        RuleTriggered => "RULE_TRIGGERED",
        AlertCreated => "ALERT_CREATED",
        AlertAcknowledged => "ALERT_ACKNOWLEDGED",
        UserUpdated => "USER_UPDATED",
        UserDeleted => "USER_DELETED",
        SystemError => "SYSTEM_ERROR",
        SyntheticVariableCreated => "SYNTHETIC_VARIABLE_CREATED",
        SyntheticVariableUpdated => "SYNTHETIC_VARIABLE_UPDATED",
        SyntheticVariableDeleted => "SYNTHETIC_VARIABLE_DELETED",
    }
}

text_enum! {
    pub enum EventSeverity {
        Info => "INFO",
        Warning => "WARNING",
        Error => "ERROR",
        Critical => "CRITICAL",
    }
}

text_enum! {
    /// Entities that can be moved to the trash
    pub enum EntityType {
        User => "USER",
        Device => "DEVICE",
        Organization => "ORGANIZATION",
    }
}

impl EntityType {
    /// Human label used in messages ("Device is already deleted")
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::User => "User",
            EntityType::Device => "Device",
            EntityType::Organization => "Organization",
        }
    }
}

text_enum! {
    /// How a global rule picks the devices it aggregates over
    pub enum SelectorType {
        Organization => "ORGANIZATION",
        Tag => "TAG",
        DeviceList => "DEVICE_LIST",
    }
}

text_enum! {
    pub enum AggregationFunction {
        CountDevices => "COUNT_DEVICES",
        CountOnline => "COUNT_ONLINE",
        CountOffline => "COUNT_OFFLINE",
        CountAlerting => "COUNT_ALERTING",
        PercentOnline => "PERCENT_ONLINE",
        PercentOffline => "PERCENT_OFFLINE",
        Avg => "AVG",
        Sum => "SUM",
        Min => "MIN",
        Max => "MAX",
        Stddev => "STDDEV",
        Percentile => "PERCENTILE",
    }
}

impl AggregationFunction {
    pub fn requires_variable(&self) -> bool {
        matches!(
            self,
            AggregationFunction::Avg
                | AggregationFunction::Sum
                | AggregationFunction::Min
                | AggregationFunction::Max
                | AggregationFunction::Stddev
                | AggregationFunction::Percentile
        )
    }
}

text_enum! {
    pub enum ArchiveStatus {
        Running => "RUNNING",
        Success => "SUCCESS",
        Failed => "FAILED",
    }
}
