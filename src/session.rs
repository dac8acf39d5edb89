//! Session handle: the component's primary interface and its sub-interfaces.

use crate::error::{BridgeError, BridgeResult};
use crate::native::{AsyncProcessor, ErrorInfoSupport, InterfaceId, TitleClient, TitleManager};
use std::sync::Arc;

/// Owns every native reference of one session.
///
/// References are released in reverse acquisition order (error-info, processor,
/// client, primary), exactly once, either by [`SessionHandle::release`] or on drop.
pub struct SessionHandle {
    error_info: Option<Box<dyn ErrorInfoSupport>>,
    processor: Option<Arc<dyn AsyncProcessor>>,
    client: Option<Arc<dyn TitleClient>>,
    primary: Option<Box<dyn TitleManager>>,
}

impl SessionHandle {
    /// Fetch the client and its async processor from `primary`.
    ///
    /// Either one missing is fatal; anything already obtained is released before
    /// the error is returned. Error-info support is best effort.
    pub fn open(primary: Box<dyn TitleManager>) -> BridgeResult<Self> {
        let client = primary.client().map_err(BridgeError::Session)?;
        let processor = client
            .create_async_processor()
            .map_err(BridgeError::Session)?;
        let error_info = register_error_info(primary.as_ref());

        Ok(Self {
            error_info,
            processor: Some(processor),
            client: Some(client),
            primary: Some(primary),
        })
    }

    pub fn client(&self) -> Option<Arc<dyn TitleClient>> {
        self.client.clone()
    }

    pub fn processor(&self) -> Option<Arc<dyn AsyncProcessor>> {
        self.processor.clone()
    }

    pub fn has_error_info(&self) -> bool {
        self.error_info.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.primary.is_none()
    }

    /// Release all references. Later calls do nothing.
    pub fn release(&mut self) {
        self.error_info.take();
        self.processor.take();
        self.client.take();
        if self.primary.take().is_some() {
            log::debug!(target: "title_bridge::session", "Released primary interface");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

fn register_error_info(primary: &dyn TitleManager) -> Option<Box<dyn ErrorInfoSupport>> {
    let support = match primary.error_info() {
        Ok(support) => support,
        Err(err) => {
            log::debug!(
                target: "title_bridge::session",
                "No error-info support: {}",
                err
            );
            return None;
        }
    };
    match support.interface_supports_error_info(InterfaceId::TITLE_MANAGER) {
        Ok(supported) => log::debug!(
            target: "title_bridge::session",
            "Detailed error info for {}: {}",
            InterfaceId::TITLE_MANAGER.name(),
            supported
        ),
        Err(err) => log::debug!(
            target: "title_bridge::session",
            "Error-info registration failed: {}",
            err
        ),
    }
    Some(support)
}
