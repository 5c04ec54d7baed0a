/*!
Foreign Function Interface (FFI) module.

C-compatible bindings for the Stream and Vault APIs, so C and C++
applications can use the library in place of the reference C headers.
*/

mod c_api;
mod vault_api;

pub use c_api::*;
pub use vault_api::*;
