//! Command buffers and their forward-only state machine.
//!
//! A [`CommandBuffer`] is recorded on any thread, tagged with the
//! [`BackendKind`] it was recorded for, and handed to a
//! [`CommandQueue`](crate::CommandQueue). From then on the queue owns it
//! until its completion handle resolves.
//!
//! ```text
//! Recording ──submit──▶ Submitted ──executor picks up──▶ Executing ──▶ Complete
//! ```
//!
//! Buffers rejected before execution (stale render target, queue shut
//! down) stay `Submitted`; their handle carries the error.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use cacao_core::{BackendKind, BufferId, GpuError};

use crate::surface::FrameTarget;

/// Inline capacity for recorded commands; typical frames fit without
/// spilling to the heap.
pub const INLINE_COMMANDS: usize = 8;

/// The recorded command list of one buffer.
pub type CommandList = SmallVec<[Command; INLINE_COMMANDS]>;

/// Work executed on the GPU worker after the preceding commands.
pub type HostFn = Box<dyn FnOnce() -> Result<(), GpuError> + Send>;

/// A backend-agnostic recorded operation.
pub enum Command {
    /// Begin rendering into the buffer's frame target, clearing it.
    BeginRendering {
        /// RGBA clear color.
        clear_color: [f32; 4],
    },
    /// End the current rendering pass.
    EndRendering,
    /// Debug label. No effect on execution.
    Marker(Cow<'static, str>),
    /// Host callback run on the executing thread, in command order.
    Host(HostFn),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeginRendering { clear_color } => f
                .debug_struct("BeginRendering")
                .field("clear_color", clear_color)
                .finish(),
            Self::EndRendering => f.write_str("EndRendering"),
            Self::Marker(label) => f.debug_tuple("Marker").field(label).finish(),
            Self::Host(_) => f.write_str("Host(..)"),
        }
    }
}

/// Lifecycle state of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CommandState {
    /// Owned by the caller; commands may be appended.
    Recording = 0,
    /// Accepted by a queue, not yet picked up by the executor.
    Submitted = 1,
    /// Handed to the device or being run by the worker.
    Executing = 2,
    /// The executor is done with it; the handle is resolved.
    Complete = 3,
}

impl CommandState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Recording,
            1 => Self::Submitted,
            2 => Self::Executing,
            _ => Self::Complete,
        }
    }

    /// The only state this one may move to.
    pub fn successor(self) -> Option<CommandState> {
        match self {
            Self::Recording => Some(Self::Submitted),
            Self::Submitted => Some(Self::Executing),
            Self::Executing => Some(Self::Complete),
            Self::Complete => None,
        }
    }
}

/// Shared state cell of one buffer, readable through [`BufferStatus`].
#[derive(Debug)]
pub(crate) struct StateCell {
    state: AtomicU8,
    /// Bit `n` set once state `n` has been entered.
    visited: AtomicU8,
}

impl StateCell {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(CommandState::Recording as u8),
            visited: AtomicU8::new(1 << CommandState::Recording as u8),
        }
    }

    /// Move to `next`. Fails, leaving the state untouched, unless `next`
    /// is the immediate successor of the current state.
    pub(crate) fn advance(&self, next: CommandState) -> Result<(), CommandState> {
        let current = CommandState::from_u8(self.state.load(Ordering::Acquire));
        if current.successor() != Some(next) {
            return Err(current);
        }
        self.state
            .compare_exchange(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(CommandState::from_u8)?;
        self.visited.fetch_or(1 << next as u8, Ordering::AcqRel);
        Ok(())
    }

    fn get(&self) -> CommandState {
        CommandState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Advance a buffer's state from queue code, where an illegal transition
/// is a bug in this crate.
pub(crate) fn transition(id: BufferId, cell: &StateCell, next: CommandState) {
    if let Err(current) = cell.advance(next) {
        tracing::error!(buffer = %id, ?current, ?next, "illegal command buffer transition");
        debug_assert!(false, "buffer {id}: {current:?} -> {next:?}");
    }
}

/// Read-only view of a buffer's state that outlives the buffer itself.
#[derive(Clone, Debug)]
pub struct BufferStatus {
    cell: Arc<StateCell>,
}

impl BufferStatus {
    /// Current state.
    pub fn state(&self) -> CommandState {
        self.cell.get()
    }

    /// Every state the buffer has been in so far, in order.
    pub fn history(&self) -> SmallVec<[CommandState; 4]> {
        let bits = self.cell.visited.load(Ordering::Acquire);
        [
            CommandState::Recording,
            CommandState::Submitted,
            CommandState::Executing,
            CommandState::Complete,
        ]
        .into_iter()
        .filter(|s| bits & (1 << *s as u8) != 0)
        .collect()
    }
}

/// An ordered list of recorded commands for one execution model.
pub struct CommandBuffer {
    id: BufferId,
    kind: BackendKind,
    commands: CommandList,
    target: Option<FrameTarget>,
    cell: Arc<StateCell>,
}

impl CommandBuffer {
    /// Start recording a buffer for `kind`.
    ///
    /// Prefer [`CommandQueue::create_buffer`](crate::CommandQueue::create_buffer),
    /// which picks the queue's kind.
    pub fn new(kind: BackendKind) -> Self {
        Self {
            id: BufferId::next(),
            kind,
            commands: SmallVec::new(),
            target: None,
            cell: Arc::new(StateCell::new()),
        }
    }

    /// Unique id, for logs.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The execution model this buffer was recorded for.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Append a command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Append [`Command::BeginRendering`].
    pub fn begin_rendering(&mut self, clear_color: [f32; 4]) -> &mut Self {
        self.push(Command::BeginRendering { clear_color })
    }

    /// Append [`Command::EndRendering`].
    pub fn end_rendering(&mut self) -> &mut Self {
        self.push(Command::EndRendering)
    }

    /// Append a debug [`Command::Marker`].
    pub fn marker(&mut self, label: impl Into<Cow<'static, str>>) -> &mut Self {
        self.push(Command::Marker(label.into()))
    }

    /// Append a [`Command::Host`] callback.
    pub fn host<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce() -> Result<(), GpuError> + Send + 'static,
    {
        self.push(Command::Host(Box::new(f)))
    }

    /// Render into (and present) an acquired frame.
    pub fn set_target(&mut self, target: FrameTarget) -> &mut Self {
        self.target = Some(target);
        self
    }

    /// The frame this buffer renders into, if any.
    pub fn target(&self) -> Option<FrameTarget> {
        self.target
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether no commands have been recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// A status view that stays valid after submission.
    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            cell: Arc::clone(&self.cell),
        }
    }

    pub(crate) fn into_parts(self) -> BufferParts {
        BufferParts {
            id: self.id,
            commands: self.commands,
            target: self.target,
            cell: self.cell,
        }
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("commands", &self.commands.len())
            .field("target", &self.target)
            .field("state", &self.cell.get())
            .finish()
    }
}

/// A buffer taken apart by the queue that accepted it.
pub(crate) struct BufferParts {
    pub id: BufferId,
    pub commands: CommandList,
    pub target: Option<FrameTarget>,
    pub cell: Arc<StateCell>,
}
