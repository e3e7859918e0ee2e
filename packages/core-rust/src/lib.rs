//! `hahub` core: mapping tables, three-stage command resolution, custom commands,
//! and the collaborator traits the server wires together.

pub mod command;
pub mod context;
pub mod mapping;
pub mod resolver;
pub mod traits;
pub mod types;

pub use command::{CommandHandler, CommandRegistry};
pub use context::{CommandContext, ShutdownHandle};
pub use mapping::{default_mappings, MappingSnapshot, MappingTable, PhraseMatch};
pub use resolver::{CommandResolver, LocalResolution};
pub use traits::{BackendConnector, FallbackResolver, Inbox};
pub use types::{BackendCommand, BackendReply, EntityInfo, Resolution, ResolutionFailure};
