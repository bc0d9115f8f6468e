use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod deref;

/// Derives `Deref` to the inner field of a tuple newtype.
#[proc_macro_derive(Deref)]
pub fn derive_deref(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    deref::expand(input, false)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Derives `DerefMut`. Requires `Deref` on the same type.
#[proc_macro_derive(DerefMut)]
pub fn derive_deref_mut(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    deref::expand(input, true)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
