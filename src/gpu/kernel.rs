//! Kernel argument binding.
//!
//! Every compute entry point owns one plain struct of named buffer handles.
//! The struct is bound once by registering it with each buffer it reads or
//! writes; buffers push a fresh handle into it whenever they reallocate.

use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;

use super::buffer::{BufferHandle, DeviceBuffer};

/// Argument struct of one compute entry point.
pub trait KernelArgs: Send + 'static {
    /// Tag naming one argument slot.
    type Arg: Copy + Send + Sync + 'static;

    fn bind(&mut self, arg: Self::Arg, handle: BufferHandle);
}

/// A named kernel together with its shared, rebindable argument struct.
#[derive(Debug)]
pub struct KernelBinding<K: KernelArgs> {
    name: &'static str,
    args: Arc<Mutex<K>>,
}

impl<K: KernelArgs> Clone for KernelBinding<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            args: Arc::clone(&self.args),
        }
    }
}

impl<K: KernelArgs + Default> KernelBinding<K> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Arc::new(Mutex::new(K::default())),
        }
    }
}

impl<K: KernelArgs> KernelBinding<K> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Binds `arg` to `buffer` and keeps it bound across reallocations.
    pub fn attach<T: Pod>(&self, buffer: &mut DeviceBuffer<T>, arg: K::Arg) {
        let args = Arc::clone(&self.args);
        buffer.register(move |handle| args.lock().bind(arg, handle));
    }

    /// Copy of the current argument struct.
    pub fn args(&self) -> K
    where
        K: Clone,
    {
        self.args.lock().clone()
    }
}

/// Declares a kernel argument struct with one [`BufferHandle`] per slot and
/// the matching slot tag enum.
#[macro_export]
macro_rules! kernel_args {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $arg:ident {
            $($field:ident => $slot:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        $vis struct $name {
            $(pub $field: $crate::gpu::BufferHandle,)+
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $arg {
            $($slot,)+
        }

        impl $crate::gpu::KernelArgs for $name {
            type Arg = $arg;

            fn bind(&mut self, arg: $arg, handle: $crate::gpu::BufferHandle) {
                match arg {
                    $($arg::$slot => self.$field = handle,)+
                }
            }
        }

        impl $name {
            /// Smallest capacity across all bound slots.
            pub fn bound_capacity(&self) -> usize {
                [$(self.$field.capacity),+].into_iter().min().unwrap_or(0)
            }
        }
    };
}
