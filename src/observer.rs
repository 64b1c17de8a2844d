//! Collaborators the client engine talks to

use std::io;

use crate::base::BaseType;
use crate::error::RegistrationError;
use crate::security::Security;

/// Outbound datagram path to the management server
pub trait Transport {
    fn send(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Registration lifecycle and tree change notifications
///
/// Every method has an empty default so applications implement only what
/// they care about.
pub trait Observer {
    /// Bootstrap finished with a usable account
    fn bootstrap_done(&mut self, _security: &Security) {}

    /// The server accepted the registration
    fn object_registered(&mut self) {}

    /// The registration was removed
    fn object_unregistered(&mut self) {}

    /// A registration update was accepted
    fn registration_updated(&mut self) {}

    fn error(&mut self, _error: RegistrationError) {}

    /// The server changed a value in the tree
    fn value_updated(&mut self, _path: &str, _base_type: BaseType) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).send(data)
    }
}

impl<T: Observer + ?Sized> Observer for &mut T {
    fn bootstrap_done(&mut self, security: &Security) {
        (**self).bootstrap_done(security)
    }

    fn object_registered(&mut self) {
        (**self).object_registered()
    }

    fn object_unregistered(&mut self) {
        (**self).object_unregistered()
    }

    fn registration_updated(&mut self) {
        (**self).registration_updated()
    }

    fn error(&mut self, error: RegistrationError) {
        (**self).error(error)
    }

    fn value_updated(&mut self, path: &str, base_type: BaseType) {
        (**self).value_updated(path, base_type)
    }
}
