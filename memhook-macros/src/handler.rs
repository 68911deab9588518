//! Handler-related macros.
//!
//! This module contains:
//! - `#[handler]` - Attribute macro for creating Handler implementations

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    FnArg, Ident, ItemFn, LitInt, LitStr, Token,
    parse::{Parse, ParseStream},
    parse_macro_input,
};

/// Arguments shared by `#[handler]` and `#[subscribe]`.
pub(crate) struct HandlerArgs {
    /// Event type constants, e.g. `MMAP | VM_MAPPED`.
    pub events: Vec<Ident>,
    pub priority: i32,
    pub name: Option<String>,
}

impl Parse for HandlerArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut events = Vec::new();
        let mut priority = 0;
        let mut name = None;

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "events" => {
                    events.push(input.parse()?);
                    while input.peek(Token![|]) {
                        input.parse::<Token![|]>()?;
                        events.push(input.parse()?);
                    }
                }
                "priority" => {
                    let negative = input.peek(Token![-]);
                    if negative {
                        input.parse::<Token![-]>()?;
                    }
                    let lit: LitInt = input.parse()?;
                    let magnitude: i64 = lit.base10_parse()?;
                    let value = if negative { -magnitude } else { magnitude };
                    priority = i32::try_from(value).map_err(|_| {
                        syn::Error::new(lit.span(), "priority does not fit in i32")
                    })?;
                }
                "name" => {
                    let lit: LitStr = input.parse()?;
                    name = Some(lit.value());
                }
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", other),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        if events.is_empty() {
            return Err(input.error("missing `events = ...`"));
        }

        Ok(HandlerArgs {
            events,
            priority,
            name,
        })
    }
}

/// Generate the unit struct and its `Handler` implementation.
///
/// Returns the struct name alongside the tokens.
pub(crate) fn generate_handler(
    args: &HandlerArgs,
    input: &ItemFn,
) -> syn::Result<(Ident, proc_macro2::TokenStream)> {
    let fn_name = &input.sig.ident;
    let fn_vis = &input.vis;

    if let Some(asyncness) = &input.sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "Memory event handlers cannot be async",
        ));
    }

    let struct_name = match &args.name {
        Some(custom_name) => Ident::new(custom_name, fn_name.span()),
        None => fn_name.clone(),
    };
    let handler_name = struct_name.to_string();

    let inputs = &input.sig.inputs;
    if let Some(FnArg::Receiver(receiver)) = inputs.first() {
        return Err(syn::Error::new_spanned(
            receiver,
            "Handler function cannot take `self`",
        ));
    }
    let call = match inputs.len() {
        1 => quote! { __memhook_inner(__event) },
        2 => quote! { __memhook_inner(__event_type, __event) },
        _ => {
            return Err(syn::Error::new_spanned(
                &input.sig,
                "Handler function must take `(event: &mut Event)` or \
                 `(event_type: EventType, event: &mut Event)`",
            ));
        }
    };

    let mut inner = input.clone();
    inner.sig.ident = Ident::new("__memhook_inner", fn_name.span());
    inner.vis = syn::Visibility::Inherited;
    inner.attrs.clear();

    let events = &args.events;
    let priority = args.priority;

    let expanded = quote! {
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, Default)]
        #[doc = concat!("Auto-generated Handler from `#[memhook::handler]` on `", stringify!(#fn_name), "`")]
        #fn_vis struct #struct_name;

        impl #struct_name {
            /// Events this handler subscribes to.
            pub const EVENTS: ::memhook::EventType = ::memhook::EventType::from_bits_retain(
                0 #( | ::memhook::EventType::#events.bits() )*
            );
            /// The priority of this handler.
            pub const PRIORITY: i32 = #priority;
            /// The name of this handler.
            pub const NAME: &'static str = #handler_name;
        }

        impl ::memhook::Handler for #struct_name {
            fn on_event(
                &self,
                __event_type: ::memhook::EventType,
                __event: &mut ::memhook::Event,
            ) {
                #[allow(unused_variables)]
                #inner
                #call
            }
        }
    };

    Ok((struct_name, expanded))
}

/// Implementation of the `#[handler]` macro.
pub fn handler_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as HandlerArgs);
    let input = parse_macro_input!(item as ItemFn);

    match generate_handler(&args, &input) {
        Ok((_, expanded)) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}
