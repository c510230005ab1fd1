//! Watchdog attributes for tests. A wedged select loop or a lost channel
//! message should fail the test run, not hang it, so every test body runs on
//! a spawned thread and the harness thread enforces a deadline.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitInt};

const DEFAULT_SECS: u64 = 60;

fn parse_secs(attr: TokenStream) -> u64 {
    if attr.is_empty() {
        return DEFAULT_SECS;
    }
    let lit: LitInt = syn::parse(attr).expect("timeout expects an integer number of seconds");
    let secs: u64 = lit
        .base10_parse()
        .unwrap_or_else(|err| panic!("invalid timeout value: {err}"));
    assert!(secs > 0, "timeout must be greater than zero");
    secs
}

fn watchdog(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let deadline = std::time::Duration::from_secs(#secs);
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
            let _ = done_tx.send(outcome);
        });
        match done_rx.recv_timeout(deadline) {
            Ok(Ok(())) => {}
            Ok(Err(panic)) => std::panic::resume_unwind(panic),
            Err(_) => panic!("test exceeded {}s timeout", #secs),
        }
    }
}

/// Wrap a synchronous test in a timeout. `#[test_timeout::timeout]` or
/// `#[test_timeout::timeout(10)]`.
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = parse_secs(attr);
    let func = parse_macro_input!(item as ItemFn);
    if func.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "timeout expects a synchronous test; use tokio_timeout_test for async",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs, vis, sig, block, ..
    } = func;
    let guarded = watchdog(secs, quote!( #block ));

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #guarded
        }
    })
}

/// Wrap an async test in a timeout on a current-thread tokio runtime.
/// `#[test_timeout::tokio_timeout_test]` or
/// `#[test_timeout::tokio_timeout_test(10)]`.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = parse_secs(attr);
    let func = parse_macro_input!(item as ItemFn);
    if func.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "tokio_timeout_test expects an async test function",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = func;
    sig.asyncness = None;

    let body = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(#secs), async move #block)
                .await
                .expect("test exceeded async timeout");
        });
    };
    let guarded = watchdog(secs, body);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #guarded
        }
    })
}
