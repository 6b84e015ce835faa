use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, ItemFn, Pat, Signature, Type};

/// Run an asynchronous test on Rocket's test runtime with injected dependencies.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`], a
/// tracked client over a freshly built server, and `crate::engine::testing::Harness`,
/// the in-memory store, fixed clock and recording audit hook that server runs on.
/// Each test gets its own harness, so tests never see each other's data.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    if !args.is_empty() {
        let args = TokenStream2::from(args);
        return syn::Error::new(args.span(), "`backend_test` takes no arguments")
            .into_compile_error()
            .into();
    }
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(&item_fn.sig) {
        Ok(args) => args,
        Err(err) => return err.into_compile_error().into(),
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let attrs = std::mem::take(&mut item_fn.attrs);
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    quote! {
        #(#attrs)*
        #[rocket::async_test]
        async fn #name() {
            /// The test itself.
            #item_fn

            let harness = crate::engine::testing::Harness::new();
            let rocket = crate::rocket_for_engine(harness.engine.clone(), crate::Config::example());
            let rocket_client = rocket::local::asynchronous::Client::tracked(rocket)
                .await
                .expect("valid test server");

            #[allow(unused_variables)]
            let (rocket_client, harness) = (rocket_client, harness);
            #new_name(#(#test_args),*).await;
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: &Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_harness = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                let type_ident = type_path.path.segments.last().map(|seg| &seg.ident);
                if type_ident.map_or(false, |ident| ident == "Client") {
                    if has_client {
                        return Err(syn::Error::new(
                            input.span(),
                            "Test cannot accept more than one `rocket::local::asynchronous::Client`",
                        ));
                    }
                    has_client = true;
                    args.push(quote! { rocket_client });
                    continue;
                } else if type_ident.map_or(false, |ident| ident == "Harness") {
                    if has_harness {
                        return Err(syn::Error::new(
                            input.span(),
                            "Test cannot accept more than one `Harness`",
                        ));
                    }
                    has_harness = true;
                    args.push(quote! { harness });
                    continue;
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client` or `harness_ident: Harness`",
        ));
    }

    Ok(args)
}
