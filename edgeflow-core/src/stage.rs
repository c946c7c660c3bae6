//! Stage Contract and Lifecycle
//!
//! ## Overview
//!
//! Every stage is one of three variants with disjoint operations. All of
//! them share the [`Lifecycle`] capability:
//!
//! ```text
//!                 ┌────────────┐
//!                 │ Lifecycle  │  init(context) -> issues, destroy()
//!                 └─────┬──────┘
//!        ┌──────────────┼───────────────┐
//!  ┌─────┴────┐   ┌─────┴─────┐   ┌─────┴───────┐
//!  │  Origin  │   │ Processor │   │ Destination │
//!  │ produce  │   │  process  │   │    write    │
//!  └──────────┘   └───────────┘   └─────────────┘
//! ```
//!
//! Factories return the tagged [`Stage`] sum and the runner dispatches on
//! the tag. Stages never call one another.
//!
//! ## Lifecycle State Machine
//!
//! ```text
//! Created ──init (no issues)──▶ Initialised ──produce|process|write──▶ Running
//!    │                               │                                   │
//!    └───────────────destroy─────────┴──────────────destroy──────────────┴──▶ Destroyed
//! ```
//!
//! `init` may be called at most once, even when it returned issues.
//! `destroy` is idempotent. [`StageInstance`] enforces these rules and
//! returns [`StageError::IllegalState`] for any call the state machine does
//! not allow, so that every accepted call sequence matches
//! `init (produce|process|write)* destroy?`.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::batch::{Batch, BatchMaker};
use crate::context::StageContext;
use crate::errors::{StageError, StageResult};

/// Configuration problem found during `init`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Configuration the problem is attributed to, if any
    pub config_name: Option<String>,
    /// Human readable description
    pub message: String,
}

impl Issue {
    /// Issue tied to a named configuration
    pub fn config(config_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            config_name: Some(config_name.into()),
            message: message.into(),
        }
    }

    /// Issue not tied to a configuration
    pub fn stage(message: impl Into<String>) -> Self {
        Self {
            config_name: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.config_name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Capability shared by every stage variant
pub trait Lifecycle: Send {
    /// Validate configuration and acquire resources
    ///
    /// A non-empty result means the stage must not be used.
    fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue>;

    /// Release resources; must tolerate being called without a prior `init`
    fn destroy(&mut self);
}

/// Source of records
pub trait Origin: Lifecycle {
    /// Fill `batch_maker` with up to `max_batch_size` records
    ///
    /// Returns the new offset; `None` asks the pipeline to stop.
    fn produce(
        &mut self,
        last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut dyn BatchMaker,
    ) -> StageResult<Option<String>>;
}

/// Record transform
pub trait Processor: Lifecycle {
    /// Transform `batch` into `batch_maker`
    ///
    /// Every input record must either reach the maker or be routed to
    /// error through the context.
    fn process(&mut self, batch: &Batch, batch_maker: &mut dyn BatchMaker) -> StageResult<()>;
}

/// Record sink
pub trait Destination: Lifecycle {
    /// Deliver a batch; an `Err` fails the whole batch
    fn write(&mut self, batch: &Batch) -> StageResult<()>;
}

/// Context holder embedded by stage implementations
#[derive(Clone, Default)]
pub struct StageBase {
    context: Option<Arc<dyn StageContext>>,
}

impl StageBase {
    /// Keep the context handed to `init`
    pub fn attach(&mut self, context: Arc<dyn StageContext>) {
        self.context = Some(context);
    }

    /// Context handed to `init`
    pub fn context(&self) -> StageResult<&Arc<dyn StageContext>> {
        self.context.as_ref().ok_or(StageError::IllegalState {
            operation: "use",
            state: LifecycleState::Created.as_str(),
        })
    }

    /// Whether `init` attached a context
    pub fn is_attached(&self) -> bool {
        self.context.is_some()
    }

    /// Forget the context on `destroy`
    pub fn detach(&mut self) {
        self.context = None;
    }
}

impl fmt::Debug for StageBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageBase")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Tagged stage variant returned by factories
pub enum Stage {
    /// Source stage
    Origin(Box<dyn Origin>),
    /// Transform stage
    Processor(Box<dyn Processor>),
    /// Sink stage
    Destination(Box<dyn Destination>),
}

/// Variant tag of a [`Stage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Source stage
    Origin,
    /// Transform stage
    Processor,
    /// Sink stage
    Destination,
}

impl StageKind {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Origin => "origin",
            StageKind::Processor => "processor",
            StageKind::Destination => "destination",
        }
    }
}

impl Stage {
    /// Variant tag
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Origin(_) => StageKind::Origin,
            Stage::Processor(_) => StageKind::Processor,
            Stage::Destination(_) => StageKind::Destination,
        }
    }

    fn lifecycle(&mut self) -> &mut dyn Lifecycle {
        match self {
            Stage::Origin(stage) => stage.as_mut(),
            Stage::Processor(stage) => stage.as_mut(),
            Stage::Destination(stage) => stage.as_mut(),
        }
    }

    /// Run `init` on the wrapped stage
    pub fn init(&mut self, context: Arc<dyn StageContext>) -> Vec<Issue> {
        self.lifecycle().init(context)
    }

    /// Run `destroy` on the wrapped stage
    pub fn destroy(&mut self) {
        self.lifecycle().destroy()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Stage").field(&self.kind()).finish()
    }
}

/// Lifecycle state of a [`StageInstance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, `init` not yet successful
    Created,
    /// `init` returned no issues
    Initialised,
    /// At least one data operation was invoked
    Running,
    /// `destroy` was called
    Destroyed,
}

impl LifecycleState {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialised => "initialised",
            LifecycleState::Running => "running",
            LifecycleState::Destroyed => "destroyed",
        }
    }
}

/// Stage paired with its lifecycle state
#[derive(Debug)]
pub struct StageInstance {
    stage: Stage,
    state: LifecycleState,
    init_called: bool,
}

impl StageInstance {
    /// Wrap a freshly constructed stage
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            state: LifecycleState::Created,
            init_called: false,
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Variant tag of the wrapped stage
    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    /// Initialise the stage; returns the issues it reported
    pub fn init(&mut self, context: Arc<dyn StageContext>) -> StageResult<Vec<Issue>> {
        if self.init_called || self.state != LifecycleState::Created {
            return Err(self.illegal("init"));
        }
        self.init_called = true;
        let issues = self.stage.init(context);
        if issues.is_empty() {
            self.state = LifecycleState::Initialised;
            info!("{} stage initialised", self.kind().as_str());
        } else {
            debug!("{} stage reported {} init issue(s)", self.kind().as_str(), issues.len());
        }
        Ok(issues)
    }

    /// Invoke the origin's `produce`
    pub fn produce(
        &mut self,
        last_offset: Option<&str>,
        max_batch_size: usize,
        batch_maker: &mut dyn BatchMaker,
    ) -> StageResult<Option<String>> {
        self.enter_running("produce")?;
        match &mut self.stage {
            Stage::Origin(origin) => origin.produce(last_offset, max_batch_size, batch_maker),
            _ => Err(StageError::WrongVariant("origin")),
        }
    }

    /// Invoke the processor's `process`
    pub fn process(&mut self, batch: &Batch, batch_maker: &mut dyn BatchMaker) -> StageResult<()> {
        self.enter_running("process")?;
        match &mut self.stage {
            Stage::Processor(processor) => processor.process(batch, batch_maker),
            _ => Err(StageError::WrongVariant("processor")),
        }
    }

    /// Invoke the destination's `write`
    pub fn write(&mut self, batch: &Batch) -> StageResult<()> {
        self.enter_running("write")?;
        match &mut self.stage {
            Stage::Destination(destination) => destination.write(batch),
            _ => Err(StageError::WrongVariant("destination")),
        }
    }

    /// Destroy the stage; later calls are no-ops
    pub fn destroy(&mut self) {
        if self.state == LifecycleState::Destroyed {
            return;
        }
        self.stage.destroy();
        self.state = LifecycleState::Destroyed;
        info!("{} stage destroyed", self.kind().as_str());
    }

    fn enter_running(&mut self, operation: &'static str) -> StageResult<()> {
        match self.state {
            LifecycleState::Initialised | LifecycleState::Running => {
                self.state = LifecycleState::Running;
                Ok(())
            }
            _ => Err(self.illegal(operation)),
        }
    }

    fn illegal(&self, operation: &'static str) -> StageError {
        StageError::IllegalState {
            operation,
            state: self.state.as_str(),
        }
    }
}

impl Drop for StageInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}
