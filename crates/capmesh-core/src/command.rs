// ── Command API ──
//
// Every write flows through the `Command` enum. The engine's command
// processor turns an entity command into a transport request using the
// entity's captured descriptor, then hands it to the `CommandTransport`.

use serde_json::Value;

use capmesh_api::CommandRequest;

use crate::entity::EntityRuntime;
use crate::error::CoreError;
use crate::model::DeviceId;
use crate::resolver::coerce_arguments;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All write operations the engine accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Drive an entity through its descriptor.
    Entity(EntityCommand),
    /// Send a prepared request straight to a known device.
    Raw {
        device_id: DeviceId,
        request: CommandRequest,
    },
}

/// A command addressed to an entity (or one of its slots).
///
/// `key` selects among keyed commands and arguments (`on` / `off`).
/// `arguments` replaces the declared arguments when given; either way a
/// declared argument type is applied before anything is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCommand {
    pub unique_id: String,
    pub slot: Option<String>,
    pub key: Option<String>,
    pub arguments: Option<Vec<Value>>,
}

impl EntityCommand {
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            slot: None,
            key: None,
            arguments: None,
        }
    }

    #[must_use]
    pub fn slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

impl From<EntityCommand> for Command {
    fn from(cmd: EntityCommand) -> Self {
        Self::Entity(cmd)
    }
}

/// Outcome of a successful command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Sent {
        device_id: DeviceId,
        request: CommandRequest,
    },
}

/// Build the transport request for an entity command.
///
/// Pure: fails with `ArgumentType` before anything could be transmitted.
pub(crate) fn prepare(entity: &EntityRuntime, cmd: &EntityCommand) -> Result<CommandRequest, CoreError> {
    let binding = entity
        .descriptor()
        .binding(cmd.slot.as_deref())
        .map_err(|_| CoreError::SlotNotFound {
            unique_id: entity.unique_id().to_owned(),
            slot: cmd.slot.clone().unwrap_or_default(),
        })?;

    let not_declared = || CoreError::CommandNotDeclared {
        unique_id: entity.unique_id().to_owned(),
        key: cmd.key.clone(),
    };
    let command = binding
        .command
        .as_ref()
        .ok_or_else(not_declared)?
        .select(cmd.key.as_deref())
        .ok_or_else(not_declared)?;

    let argument = binding.argument.as_ref();
    let raw_args = match &cmd.arguments {
        Some(args) => args.clone(),
        None => argument.map(|a| a.select(cmd.key.as_deref())).unwrap_or_default(),
    };
    let arguments = match argument.and_then(|a| a.arg_type) {
        Some(ty) => coerce_arguments(&raw_args, ty)?,
        None => raw_args,
    };

    Ok(CommandRequest::new(
        &binding.component,
        &binding.capability,
        command,
        arguments,
    ))
}
