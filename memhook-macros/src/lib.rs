//! Attribute macros for memhook.
//!
//! - `#[handler]` - turn a function into a `Handler` unit struct
//! - `#[subscribe]` - the same, and submit it for `memhook::install_collected`

use proc_macro::TokenStream;

mod handler;
mod subscribe;

/// Turn a function into a memhook `Handler`.
///
/// The function takes either `(event: &mut Event)` or
/// `(event_type: EventType, event: &mut Event)`. A unit struct with the
/// function's name is generated, carrying `EVENTS`, `PRIORITY` and `NAME`
/// constants.
///
/// ```rust,ignore
/// #[memhook::handler(events = MMAP | MUNMAP, priority = -10)]
/// fn watch(event: &mut Event) {
///     // ...
/// }
///
/// memhook::register_static(watch::EVENTS, watch::PRIORITY, &watch)?;
/// ```
#[proc_macro_attribute]
pub fn handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    handler::handler_impl(attr, item)
}

/// Like `#[handler]`, and additionally submit the handler to the
/// distributed collection installed by `memhook::install_collected()`.
///
/// Requires the `inventory` feature of `memhook`.
#[proc_macro_attribute]
pub fn subscribe(attr: TokenStream, item: TokenStream) -> TokenStream {
    subscribe::subscribe_impl(attr, item)
}
