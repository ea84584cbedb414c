//! # Platform
//!
//! The host facilities the connector leans on: whether a target exists, whether
//! we may talk to it, and how to open a channel to it.

use std::sync::Arc;

use sibrpc::Channel;

use crate::error::BindError;
use crate::ids::Target;

#[async_trait::async_trait]
pub trait Platform: Send + Sync + 'static {
    /// The target is installed and can be bound at all.
    fn is_reachable(&self, target: &Target) -> bool;

    /// This side holds the permission needed to bind the target.
    fn is_authorized(&self, target: &Target) -> bool;

    /// Opens a channel. The connector bounds this with its bind timeout.
    async fn bind(&self, target: &Target) -> Result<Arc<dyn Channel>, BindError>;

    /// Called when the connector lets go of a bound channel.
    fn release(&self, _target: &Target) {}

    fn is_available(&self, target: &Target) -> bool {
        self.is_reachable(target) && self.is_authorized(target)
    }
}
