//! Tenant data access.
//!
//! Every function takes the request's [`TenantConnection`] explicitly; there is
//! no ambient "current tenant". A handler can only touch the database it was
//! given by the resolver.
//!
//! [`TenantConnection`]: storefront_tenancy_storage::TenantConnection

pub mod carts;
pub mod products;
pub mod users;
