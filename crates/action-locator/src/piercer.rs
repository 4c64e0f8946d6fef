//! Closed shadow-root registry injection.

use cdp_adapter::CdpAdapter;
use tracing::debug;

use crate::errors::{from_adapter, LocatorError};
use crate::scripts::SHADOW_PIERCER_SCRIPT;

/// Installs the shadow-root registry in every current and future document of the browser.
///
/// Must run before the pages whose closed roots should be reachable create them; roots
/// attached earlier stay invisible to the resolver.
pub async fn install_piercer(adapter: &CdpAdapter) -> Result<(), LocatorError> {
    adapter
        .add_init_script(SHADOW_PIERCER_SCRIPT)
        .await
        .map_err(from_adapter)?;
    debug!(target: "action-locator", "shadow piercer installed");
    Ok(())
}
