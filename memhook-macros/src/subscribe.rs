//! Subscribe-related macros.
//!
//! This module contains:
//! - `#[subscribe]` - Attribute macro submitting a handler to the collection

use crate::handler::{HandlerArgs, generate_handler};
use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Implementation of the `#[subscribe]` macro.
pub fn subscribe_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as HandlerArgs);
    let input = parse_macro_input!(item as ItemFn);

    let (struct_name, handler) = match generate_handler(&args, &input) {
        Ok(generated) => generated,
        Err(err) => return err.to_compile_error().into(),
    };

    let expanded = quote! {
        #handler

        ::memhook::inventory::submit! {
            ::memhook::CollectedHandler::new(
                #struct_name::EVENTS,
                #struct_name::PRIORITY,
                &#struct_name,
                #struct_name::NAME,
            )
        }
    };

    TokenStream::from(expanded)
}
