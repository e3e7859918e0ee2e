use std::fmt;
use std::str::FromStr;

/// The closed set of services the manager knows how to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    HomeAssistant,
    CommandLine,
    Interface,
    Discord,
    Telegram,
}

impl ServiceKind {
    pub const ALL: [Self; 5] = [
        Self::HomeAssistant,
        Self::CommandLine,
        Self::Interface,
        Self::Discord,
        Self::Telegram,
    ];

    /// Config name, also the registry key.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::HomeAssistant => "home_assistant",
            Self::CommandLine => "command_line",
            Self::Interface => "interface",
            Self::Discord => "discord",
            Self::Telegram => "telegram",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service \"{0}\"")]
pub struct UnknownService(pub String);

impl FromStr for ServiceKind {
    type Err = UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownService(s.to_string()))
    }
}
