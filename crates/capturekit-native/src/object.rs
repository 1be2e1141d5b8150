//! The kinds of object that live behind a handle.

use std::sync::Arc;

use capturekit_types::StreamConfiguration;
use parking_lot::Mutex;

use crate::content::{ContentSnapshot, Display, RunningApplication, Window};
use crate::error::{ContractViolation, NativeError};
use crate::filter::ContentFilter;
use crate::handle::{HandleId, HandleTable, Retainable};
use crate::pixel_buffer::{Image, PixelBuffer};
use crate::queue::DispatchQueue;
use crate::sample_buffer::SampleBuffer;
use crate::stream::StreamSession;
use crate::surface::Surface;

/// The table every boundary handle lives in.
pub type Registry = HandleTable<NativeObject>;

/// A stream configuration shared between its handle and its users.
///
/// The caller mutates it through setters; streams and screenshots take a
/// copy when they consume it.
#[derive(Debug, Default)]
pub struct ConfigurationObject {
    inner: Mutex<StreamConfiguration>,
}

impl ConfigurationObject {
    pub fn new(config: StreamConfiguration) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    /// A copy of the current values.
    pub fn snapshot(&self) -> StreamConfiguration {
        self.inner.lock().clone()
    }

    /// Read the configuration under its lock.
    pub fn read<R>(&self, f: impl FnOnce(&StreamConfiguration) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Mutate the configuration under its lock. Running streams are not
    /// affected until the configuration is applied to them.
    pub fn update<R>(&self, f: impl FnOnce(&mut StreamConfiguration) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

/// Any object reachable through a handle.
#[derive(Debug, Clone)]
pub enum NativeObject {
    Content(Arc<ContentSnapshot>),
    Display(Arc<Display>),
    Window(Arc<Window>),
    Application(Arc<RunningApplication>),
    Filter(Arc<ContentFilter>),
    Configuration(Arc<ConfigurationObject>),
    Stream(Arc<StreamSession>),
    Image(Arc<Image>),
    Sample(Arc<SampleBuffer>),
    PixelBuffer(Arc<PixelBuffer>),
    Surface(Arc<Surface>),
    Error(Arc<NativeError>),
    Queue(Arc<DispatchQueue>),
}

/// Typed access to one [`NativeObject`] variant.
pub trait NativeType: Sized + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn wrap(this: Arc<Self>) -> NativeObject;

    fn unwrap(object: &NativeObject) -> Option<Arc<Self>>;
}

macro_rules! native_types {
    ($($variant:ident => $ty:ty, $name:literal;)*) => {
        $(
            impl NativeType for $ty {
                const TYPE_NAME: &'static str = $name;

                fn wrap(this: Arc<Self>) -> NativeObject {
                    NativeObject::$variant(this)
                }

                fn unwrap(object: &NativeObject) -> Option<Arc<Self>> {
                    match object {
                        NativeObject::$variant(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )*

        impl NativeObject {
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(NativeObject::$variant(_) => $name,)*
                }
            }
        }
    };
}

native_types! {
    Content => ContentSnapshot, "shareable content";
    Display => Display, "display";
    Window => Window, "window";
    Application => RunningApplication, "running application";
    Filter => ContentFilter, "content filter";
    Configuration => ConfigurationObject, "stream configuration";
    Stream => StreamSession, "stream";
    Image => Image, "image";
    Sample => SampleBuffer, "sample buffer";
    PixelBuffer => PixelBuffer, "pixel buffer";
    Surface => Surface, "surface";
    Error => NativeError, "error";
    Queue => DispatchQueue, "dispatch queue";
}

impl NativeObject {
    /// Downcast to `T`, or report what the handle really is.
    pub fn downcast<T: NativeType>(&self, id: HandleId) -> Result<Arc<T>, ContractViolation> {
        T::unwrap(self).ok_or(ContractViolation::TypeMismatch {
            id,
            expected: T::TYPE_NAME,
            actual: self.type_name(),
        })
    }
}

impl Retainable for NativeObject {
    fn type_name(&self) -> &'static str {
        NativeObject::type_name(self)
    }

    fn on_final_release(&self) {
        if let NativeObject::Stream(stream) = self {
            stream.on_final_release();
        }
    }

    fn owned_handles(&self) -> Vec<HandleId> {
        match self {
            NativeObject::Content(snapshot) => snapshot.element_handles(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capturekit_types::ErrorKind;

    #[test]
    fn test_downcast_mismatch() {
        let table = Registry::new();
        let error = Arc::new(NativeError::new(ErrorKind::Unknown, "x"));
        let id = table.insert(NativeError::wrap(error));

        let object = table.get(id).unwrap();
        assert!(object.downcast::<NativeError>(id).is_ok());
        assert_eq!(
            object.downcast::<Display>(id).unwrap_err(),
            ContractViolation::TypeMismatch {
                id,
                expected: "display",
                actual: "error",
            }
        );
    }

    #[test]
    fn test_configuration_object_copies() {
        let object = ConfigurationObject::default();
        let before = object.snapshot();
        object.update(|c| c.width = 640);
        assert_eq!(before.width, 1920);
        assert_eq!(object.read(|c| c.width), 640);
    }
}
