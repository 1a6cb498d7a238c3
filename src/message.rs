use std::fmt::Display;

/// What the listener tells its consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatteryMessage {
    /// No headset is bound; a scan has just started.
    Scanning,
    /// A bound headset reported its battery level.
    Level { headset: &'static str, level: u8 },
}

impl BatteryMessage {
    pub fn is_scanning(&self) -> bool {
        matches!(self, BatteryMessage::Scanning)
    }

    pub fn headset(&self) -> Option<&'static str> {
        match self {
            BatteryMessage::Scanning => None,
            BatteryMessage::Level { headset, .. } => Some(*headset),
        }
    }

    /// Battery percentage, or [None] while scanning.
    pub fn level(&self) -> Option<u8> {
        match self {
            BatteryMessage::Scanning => None,
            BatteryMessage::Level { level, .. } => Some(*level),
        }
    }

    pub fn tier(&self) -> Option<BatteryTier> {
        self.level().map(BatteryTier::from_level)
    }
}

impl Display for BatteryMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BatteryMessage::Scanning => write!(f, "Scanning..."),
            BatteryMessage::Level { headset, level } => write!(f, "{headset} - {level}%"),
        }
    }
}

/// Coarse charge bands, for indicators that only show a colour.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatteryTier {
    High,
    Medium,
    Low,
}

impl BatteryTier {
    pub fn from_level(level: u8) -> Self {
        match level {
            50.. => BatteryTier::High,
            20..=49 => BatteryTier::Medium,
            _ => BatteryTier::Low,
        }
    }
}
