//! Procedure table: procedure number to a type-erased handler chain.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::protocol::rpc::{RecordSender, RpcCall};
use crate::protocol::xdr::{Deserialize, Serialize};
use crate::server::chain::{self, ChainOutcome};
use crate::server::{CallInfo, Handler, Middleware, Observer};

/// Everything a chain needs to run one call.
pub(crate) struct Dispatch {
    pub call: RpcCall,
    pub info: CallInfo,
    pub sink: RecordSender,
    pub middleware: Arc<[Arc<dyn Middleware>]>,
    pub observer: Arc<dyn Observer>,
}

type DispatchFn = dyn Fn(Dispatch) -> BoxFuture<'static, ChainOutcome> + Send + Sync;

pub(crate) struct Procedure {
    pub name: Arc<str>,
    dispatch: Box<DispatchFn>,
}

impl Procedure {
    /// Binds a chain that decodes arguments into `C` and encodes results from `R`.
    pub fn new<C, R>(name: &str, handlers: Vec<Arc<dyn Handler<C, R>>>) -> Self
    where
        C: Deserialize + Default + Send + 'static,
        R: Serialize + Default + Send + 'static,
    {
        let handlers: Arc<[Arc<dyn Handler<C, R>>]> = handlers.into();
        Self {
            name: Arc::from(name),
            dispatch: Box::new(move |dispatch: Dispatch| {
                let handlers = Arc::clone(&handlers);
                async move { chain::execute(&handlers, dispatch).await }.boxed()
            }),
        }
    }

    pub fn dispatch(&self, dispatch: Dispatch) -> BoxFuture<'static, ChainOutcome> {
        (self.dispatch)(dispatch)
    }
}

/// Filled while the server is configured; read-only once it starts.
#[derive(Default)]
pub(crate) struct ProcedureTable {
    entries: HashMap<u32, Procedure>,
}

impl ProcedureTable {
    /// Returns the entry previously registered under `proc`, if any.
    pub fn insert(&mut self, proc: u32, procedure: Procedure) -> Option<Procedure> {
        self.entries.insert(proc, procedure)
    }

    pub fn get(&self, proc: u32) -> Option<&Procedure> {
        self.entries.get(&proc)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
