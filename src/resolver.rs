//! Component resolution: private side-by-side context first, system second.
//!
//! The descriptor for the private context sits at the module root, which is the
//! bridge's install directory with its build-output segments (`build/Release`)
//! stripped off.

use crate::config::BridgeSettings;
use crate::error::{BridgeError, BridgeResult, NativeResult};
use crate::native::{ActivationCookie, ComponentActivator, ResolutionContext, TitleManager};
use std::path::{Component, Path, PathBuf};

/// Target word size, selecting the descriptor variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    pub const fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::Bits64
        } else {
            PointerWidth::Bits32
        }
    }

    pub const fn bits(self) -> u8 {
        match self {
            PointerWidth::Bits32 => 32,
            PointerWidth::Bits64 => 64,
        }
    }
}

/// `<component>.x.<bits>.manifest`
pub fn descriptor_file_name(component: &str, width: PointerWidth) -> String {
    format!("{component}.x.{}.manifest", width.bits())
}

/// Strip the last `trailing` segments from `install_dir`.
pub fn module_root(install_dir: &Path, trailing: usize) -> BridgeResult<PathBuf> {
    let components: Vec<Component<'_>> = install_dir.components().collect();
    let segments = components
        .iter()
        .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
        .count();
    if segments < trailing {
        return Err(BridgeError::InstallPath {
            path: install_dir.display().to_string(),
            required: trailing,
        });
    }
    Ok(components[..components.len() - trailing].iter().collect())
}

/// Full path of the resolution descriptor for `install_dir`.
pub fn descriptor_path(
    install_dir: &Path,
    settings: &BridgeSettings,
    width: PointerWidth,
) -> BridgeResult<PathBuf> {
    let root = module_root(install_dir, settings.trailing_segments)?;
    Ok(root.join(descriptor_file_name(&settings.component, width)))
}

/// An activated resolution context, deactivated when dropped.
pub struct ActivationScope<'a, C: ResolutionContext> {
    context: &'a C,
    cookie: Option<ActivationCookie>,
}

impl<'a, C: ResolutionContext> ActivationScope<'a, C> {
    pub fn enter(context: &'a C) -> NativeResult<Self> {
        let cookie = context.activate()?;
        Ok(Self {
            context,
            cookie: Some(cookie),
        })
    }

    pub fn context(&self) -> &'a C {
        self.context
    }
}

impl<C: ResolutionContext> Drop for ActivationScope<'_, C> {
    fn drop(&mut self) {
        if let Some(cookie) = self.cookie.take() {
            self.context.deactivate(cookie);
        }
    }
}

/// Instantiate the component, preferring the private resolution context.
///
/// A missing or unusable private context is logged and skipped. Only when
/// system resolution fails too is the error fatal.
pub fn resolve_component<A: ComponentActivator>(
    activator: &A,
    install_dir: &Path,
    settings: &BridgeSettings,
) -> BridgeResult<Box<dyn TitleManager>> {
    if let Some(context) = private_context(activator, install_dir, settings) {
        match instantiate_in(activator, &context) {
            Ok(component) => {
                log::info!(
                    target: "title_bridge::resolver",
                    "{} instantiated through private resolution context",
                    settings.component
                );
                return Ok(component);
            }
            Err(err) => log::warn!(
                target: "title_bridge::resolver",
                "Side-by-side instantiation of {} failed: {}",
                settings.component,
                err
            ),
        }
    }

    match activator.instantiate(None) {
        Ok(component) => {
            log::info!(
                target: "title_bridge::resolver",
                "{} instantiated through system resolution",
                settings.component
            );
            Ok(component)
        }
        Err(err) => {
            log::error!(
                target: "title_bridge::resolver",
                "{} cannot be instantiated: {}",
                settings.component,
                err
            );
            Err(BridgeError::instantiation(&settings.component, Some(err)))
        }
    }
}

fn private_context<A: ComponentActivator>(
    activator: &A,
    install_dir: &Path,
    settings: &BridgeSettings,
) -> Option<A::Context> {
    let descriptor = match descriptor_path(install_dir, settings, PointerWidth::current()) {
        Ok(path) => path,
        Err(err) => {
            log::warn!(target: "title_bridge::resolver", "{}", err);
            return None;
        }
    };
    match activator.create_context(&descriptor) {
        Ok(context) => Some(context),
        Err(err) => {
            log::warn!(
                target: "title_bridge::resolver",
                "Could not create resolution context from {}: {}",
                descriptor.display(),
                err
            );
            None
        }
    }
}

fn instantiate_in<A: ComponentActivator>(
    activator: &A,
    context: &A::Context,
) -> NativeResult<Box<dyn TitleManager>> {
    let scope = ActivationScope::enter(context)?;
    activator.instantiate(Some(scope.context()))
}
