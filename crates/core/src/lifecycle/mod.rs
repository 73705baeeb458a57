pub mod machine;
pub mod states;

pub use machine::{PermitStateMachine, TransitionError};
pub use states::{
    IncompleteControls, PermitEvent, TransitionContext, TransitionOutcome,
};
