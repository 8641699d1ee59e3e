//! Procedural macros shared by flowpack crates.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitStr};

/// Run a test with a `tracing` subscriber that writes to the test harness.
///
/// The optional argument sets the maximum level (`TRACE`, `DEBUG`, `INFO`, `WARN`, or
/// `ERROR`). When omitted, `DEBUG` is used.
///
/// The expanded test refers to `::tracing` and `::tracing_subscriber`, so the calling
/// crate must depend on both (usually as dev-dependencies).
///
/// # Example
///
/// ```rust,ignore
/// use flowpack_macros::test_traced;
///
/// #[test_traced("INFO")]
/// fn test_with_logs() {
///     tracing::info!("visible");
///     tracing::debug!("filtered");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Determine the maximum level
    let level = if attr.is_empty() {
        String::from("DEBUG")
    } else {
        parse_macro_input!(attr as LitStr).value()
    };
    let level = match level.to_uppercase().as_str() {
        "TRACE" => quote! { ::tracing::Level::TRACE },
        "DEBUG" => quote! { ::tracing::Level::DEBUG },
        "INFO" => quote! { ::tracing::Level::INFO },
        "WARN" => quote! { ::tracing::Level::WARN },
        "ERROR" => quote! { ::tracing::Level::ERROR },
        other => {
            return syn::Error::new(
                proc_macro2::Span::call_site(),
                format!("invalid log level: {other}"),
            )
            .to_compile_error()
            .into();
        }
    };

    // Wrap the body so that logs emitted by the test are captured by the harness
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;
    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let subscriber = ::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(#level)
                .with_line_number(true)
                .finish();
            let dispatcher = ::tracing::Dispatch::new(subscriber);
            ::tracing::dispatcher::with_default(&dispatcher, || #body)
        }
    };
    TokenStream::from(expanded)
}
