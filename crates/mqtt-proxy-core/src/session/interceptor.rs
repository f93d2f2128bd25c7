//! Generic packet transform applied just before relay.

use async_trait::async_trait;

use super::{Context, Direction};
use crate::error::HookResult;
use crate::packet::Packet;

/// Transforms every relayed packet, in both directions.
///
/// Runs after the authorization hooks and before the write. Returning an
/// error ends the session.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        ctx: &Context,
        packet: Packet,
        direction: Direction,
    ) -> HookResult<Packet>;
}
