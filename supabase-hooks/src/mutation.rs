use std::cell::RefCell;

use serde_json::Value;
use tablecache::FetchState;

use crate::client::Mutation;
use crate::context::{SupabaseContext, expect_context};
use crate::error::HookError;

/// Runs writes and tracks the last one's outcome.
///
/// Writes don't touch the table cache directly: tables with an open realtime channel pick the change up from
/// the backend like any other.
pub struct MutationHandle {
    context: SupabaseContext,
    state: RefCell<FetchState<Value, HookError>>,
}

pub fn use_mutation() -> MutationHandle {
    expect_context("use_mutation").mutation()
}

impl SupabaseContext {
    pub fn mutation(&self) -> MutationHandle {
        MutationHandle {
            context: self.clone(),
            state: RefCell::new(FetchState::Idle),
        }
    }
}

impl MutationHandle {
    pub fn data(&self) -> Option<Value> {
        self.state.borrow().data().cloned()
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn error(&self) -> Option<HookError> {
        self.state.borrow().error().cloned()
    }

    pub fn state(&self) -> FetchState<Value, HookError> {
        self.state.borrow().clone()
    }

    pub async fn execute(&self, mutation: &Mutation) {
        self.state.borrow_mut().begin();

        let client = self.context.client();
        let outcome = client.mutate(mutation).await.map_err(HookError::from);
        if let Err(e) = &outcome {
            log::error!("{e}");
        }
        self.state.borrow_mut().resolve(outcome);
    }
}
