//! The seam to the address book.
//!
//! The store persists sender/recipient addresses as their encoded strings.
//! On read they are enriched with whatever the embedding application knows
//! about them (aliases, chan flags) through an [`AddressResolver`]. The
//! resolver lives outside this crate; tests and callers without an address
//! book use [`PlainResolver`].

use crate::models::Address;

/// Resolves an encoded address string to locally known metadata.
pub trait AddressResolver {
    /// Return the enriched address, or `None` if the address is unknown.
    fn resolve(&self, address: &str) -> Option<Address>;
}

/// Resolver that knows nothing; every address comes back bare.
pub struct PlainResolver;

impl AddressResolver for PlainResolver {
    fn resolve(&self, _address: &str) -> Option<Address> {
        None
    }
}

/// Enrich an address string, falling back to a bare [`Address`].
pub(crate) fn resolve_or_plain(resolver: &dyn AddressResolver, address: &str) -> Address {
    resolver
        .resolve(address)
        .unwrap_or_else(|| Address::plain(address))
}
