use proc_macro2::TokenStream;
use quote::quote;
use syn::{spanned::Spanned, Data, DeriveInput, Fields, Type};

/// The wrapped type of a single-field tuple struct.
fn newtype_target(input: &DeriveInput) -> syn::Result<&Type> {
    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => return Err(syn::Error::new(input.span(), "expect a struct")),
    };
    match fields {
        Fields::Unnamed(fields) if fields.unnamed.len() == 1 => match fields.unnamed.first() {
            Some(field) => Ok(&field.ty),
            None => Err(syn::Error::new(fields.span(), "expect one field")),
        },
        Fields::Unnamed(fields) => Err(syn::Error::new(
            fields.span(),
            "expect a tuple struct with one field",
        )),
        _ => Err(syn::Error::new(fields.span(), "expect a tuple struct")),
    }
}

pub fn expand(input: DeriveInput, mutable: bool) -> syn::Result<TokenStream> {
    let target = newtype_target(&input)?;
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let tokens = match mutable {
        false => quote! {
            impl #impl_generics std::ops::Deref for #name #ty_generics #where_clause {
                type Target = #target;

                fn deref(&self) -> &Self::Target {
                    &self.0
                }
            }
        },
        true => quote! {
            impl #impl_generics std::ops::DerefMut for #name #ty_generics #where_clause {
                fn deref_mut(&mut self) -> &mut Self::Target {
                    &mut self.0
                }
            }
        },
    };
    Ok(tokens)
}
