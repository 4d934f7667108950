use proc_macro::TokenStream;
use quote::quote;
use syn::{Ident, ItemFn, LitStr, parse_macro_input, spanned::Spanned};

const USAGE: &str = "rxsignal_macro::test only accepts: #[rxsignal_macro::test], \
                     #[rxsignal_macro::test(local)], #[rxsignal_macro::test(shared)], or string \
                     equivalents";

/// Test attribute shared by every signal test.
///
/// Sync functions become plain `#[test]`s. Async functions run on tokio:
/// `local` selects the current-thread flavor and `shared` the multi-thread
/// flavor, which is what the race tests need.
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
  let input = parse_macro_input!(item as ItemFn);

  let is_async = input.sig.asyncness.is_some();

  let raw_args = proc_macro2::TokenStream::from(attr);
  let tokio_args = if raw_args.is_empty() {
    proc_macro2::TokenStream::new()
  } else {
    if !is_async {
      return TokenStream::from(
        syn::Error::new(
          raw_args.span(),
          "rxsignal_macro::test flavor args are only supported for async tests. Use \
           #[rxsignal_macro::test] for sync tests, or make the function async.",
        )
        .to_compile_error(),
      );
    }

    let flavor = if let Ok(ident) = syn::parse2::<Ident>(raw_args.clone()) {
      Some((ident.to_string(), ident.span()))
    } else if let Ok(lit) = syn::parse2::<LitStr>(raw_args.clone()) {
      Some((lit.value(), lit.span()))
    } else {
      None
    };

    match flavor {
      Some((name, _)) if name == "local" => quote!(flavor = "current_thread"),
      Some((name, _)) if name == "shared" => quote!(flavor = "multi_thread", worker_threads = 4),
      Some((_, span)) => {
        return TokenStream::from(syn::Error::new(span, USAGE).to_compile_error());
      }
      None => {
        return TokenStream::from(syn::Error::new(raw_args.span(), USAGE).to_compile_error());
      }
    }
  };

  let native_attr = if is_async { quote!(tokio::test(#tokio_args)) } else { quote!(test) };

  let expanded = quote! {
      #[#native_attr]
      #input
  };

  TokenStream::from(expanded)
}
