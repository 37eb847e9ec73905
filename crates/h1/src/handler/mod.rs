//! The application contract.
//!
//! For every request the connection calls [`Application::create_context`]
//! with the request's [`Features`], awaits [`Application::process_request`],
//! finishes the response and finally hands the context back to
//! [`Application::dispose_context`] together with everything that failed along
//! the way.
//!
//! Plain async functions become applications through [`make_application`].

use std::error::Error;
use std::future::Future;

use async_trait::async_trait;

use crate::frame::Features;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Errors collected while processing one request: the application's own
/// failure plus any failing response callback.
#[derive(Debug, Default)]
pub struct ApplicationErrors(Vec<BoxError>);

impl ApplicationErrors {
    pub fn push(&mut self, error: BoxError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxError> {
        self.0.iter()
    }
}

#[async_trait]
pub trait Application: Send + Sync + 'static {
    type Context: Send;

    fn create_context(&self, features: Features) -> Self::Context;

    async fn process_request(&self, context: &mut Self::Context) -> Result<(), BoxError>;

    /// Called once the response is complete. `errors` is empty on success.
    fn dispose_context(&self, context: Self::Context, errors: &ApplicationErrors) {
        let _ = (context, errors);
    }
}

#[derive(Debug)]
pub struct ApplicationFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, Err> Application for ApplicationFn<F>
where
    F: Fn(Features) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Err>> + Send,
    Err: Into<BoxError>,
{
    type Context = Option<Features>;

    fn create_context(&self, features: Features) -> Self::Context {
        Some(features)
    }

    async fn process_request(&self, context: &mut Self::Context) -> Result<(), BoxError> {
        match context.take() {
            Some(features) => (self.f)(features).await.map_err(Into::into),
            None => Ok(()),
        }
    }
}

/// Wraps an async function taking the request's [`Features`].
pub fn make_application<F, Fut, Err>(f: F) -> ApplicationFn<F>
where
    F: Fn(Features) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Err>> + Send,
    Err: Into<BoxError>,
{
    ApplicationFn { f }
}
