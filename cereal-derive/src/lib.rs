//! # Cereal Derive Macros
//!
//! This crate provides `#[derive(Cerealizable)]` for `cereal`. It implements
//! both `Cerealizable` and `CerealField` for structs with named fields.
//!
//! The generated layout is the composite-record convention:
//!
//! ```text
//! [NullBitMap over the Option fields] [fixed fields...] [present Option fields...]
//! ```
//!
//! Every `Option<T>` field is optional, every other field is fixed. Fields
//! marked `#[cereal(skip)]` are never written and decode to `Default::default()`.
//! A struct without optional fields carries no bitmap.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, GenericArgument, PathArguments, Type, parse_macro_input};

/// Derives `cereal::Cerealizable` and `cereal::CerealField`.
#[proc_macro_derive(Cerealizable, attributes(cereal))]
pub fn derive_cerealizable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;
    let generics = input.generics;

    let fields = match input.data {
        Data::Struct(ds) => match ds.fields {
            Fields::Named(named) => named.named,
            _ => {
                return syn::Error::new(name.span(), "Cerealizable only supports structs with named fields")
                    .to_compile_error()
                    .into();
            }
        },
        _ => {
            return syn::Error::new(name.span(), "Cerealizable only supports structs")
                .to_compile_error()
                .into();
        }
    };

    let mut fixed = Vec::new();
    let mut optional = Vec::new();
    let mut skipped = Vec::new();

    for field in fields {
        let skip = match parse_attributes(&field.attrs) {
            Ok(skip) => skip,
            Err(e) => return e.to_compile_error().into(),
        };
        let Some(ident) = field.ident else {
            continue;
        };

        if skip {
            skipped.push(ident);
        } else if let Some(inner) = option_inner(&field.ty) {
            optional.push(OptionalField {
                ident,
                inner: inner.clone(),
            });
        } else {
            fixed.push(FixedField { ident, ty: field.ty });
        }
    }

    let impl_cerealizable = generate_cerealizable(&name, &generics, &fixed, &optional, &skipped);
    let impl_field = generate_field(&name, &generics);

    let expanded = quote! {
        #impl_cerealizable
        #impl_field
    };

    TokenStream::from(expanded)
}

// --- Internal Data Structures ---
struct FixedField {
    ident: syn::Ident,
    ty: Type,
}
struct OptionalField {
    ident: syn::Ident,
    inner: Type,
}

/// Parses field attributes. Returns whether the field is skipped.
fn parse_attributes(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut skip = false;
    for attr in attrs {
        if attr.path().is_ident("cereal") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                    return Ok(());
                }
                Err(meta.error("Unknown cereal attribute key. Supported: skip"))
            })?;
        }
    }
    Ok(skip)
}

/// `T` for a field typed `Option<T>` (or a path ending in `Option<T>`).
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    if path.qself.is_some() {
        return None;
    }
    let last = path.path.segments.last()?;
    if last.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &last.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}

// --- Generator: Cerealizable ---

fn generate_cerealizable(
    name: &syn::Ident,
    generics: &syn::Generics,
    fixed: &[FixedField],
    optional: &[OptionalField],
    skipped: &[syn::Ident],
) -> proc_macro2::TokenStream {
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let optional_count = optional.len();

    let blank_fixed = fixed.iter().map(|f| {
        let fname = &f.ident;
        let ty = &f.ty;
        quote! { #fname: <#ty as ::cereal::CerealField>::blank_field()? }
    });
    let blank_optional = optional.iter().map(|f| {
        let fname = &f.ident;
        quote! { #fname: ::core::option::Option::None }
    });
    let blank_skipped = skipped.iter().map(|fname| {
        quote! { #fname: ::core::default::Default::default() }
    });

    let put_bitmap = if optional_count > 0 {
        let marks = optional.iter().enumerate().map(|(i, f)| {
            let fname = &f.ident;
            quote! { nulls.set_null(#i, self.#fname.is_none())?; }
        });
        quote! {
            let mut nulls = ::cereal::NullBitMap::new(#optional_count);
            #(#marks)*
            ::cereal::Cerealizable::cerealize_to(&nulls, buf)?;
        }
    } else {
        quote! {}
    };
    let put_fixed = fixed.iter().map(|f| {
        let fname = &f.ident;
        quote! { ::cereal::CerealField::put_field(&self.#fname, buf)?; }
    });
    let put_optional = optional.iter().map(|f| {
        let fname = &f.ident;
        quote! {
            if let ::core::option::Option::Some(value) = &self.#fname {
                ::cereal::CerealField::put_field(value, buf)?;
            }
        }
    });

    let get_bitmap = if optional_count > 0 {
        quote! {
            let nulls = <::cereal::NullBitMap as ::cereal::Cerealizable>::uncerealize(buf)?;
        }
    } else {
        quote! {}
    };
    let get_fixed = fixed.iter().map(|f| {
        let fname = &f.ident;
        let ty = &f.ty;
        quote! { self.#fname = <#ty as ::cereal::CerealField>::get_field(buf)?; }
    });
    let get_optional = optional.iter().enumerate().map(|(i, f)| {
        let fname = &f.ident;
        let inner = &f.inner;
        quote! {
            self.#fname = if nulls.is_null(#i) {
                ::core::option::Option::None
            } else {
                ::core::option::Option::Some(<#inner as ::cereal::CerealField>::get_field(buf)?)
            };
        }
    });

    quote! {
        impl #impl_generics ::cereal::Cerealizable for #name #ty_generics #where_clause {
            fn blank() -> ::cereal::Result<Self> {
                ::core::result::Result::Ok(Self {
                    #(#blank_fixed,)*
                    #(#blank_optional,)*
                    #(#blank_skipped,)*
                })
            }

            fn cerealize_to(&self, buf: &mut ::cereal::ChunkedBuffer) -> ::cereal::Result<()> {
                #put_bitmap
                #(#put_fixed)*
                #(#put_optional)*
                ::core::result::Result::Ok(())
            }

            fn uncerealize_from(&mut self, buf: &mut ::cereal::ChunkedBuffer) -> ::cereal::Result<()> {
                #get_bitmap
                #(#get_fixed)*
                #(#get_optional)*
                ::core::result::Result::Ok(())
            }
        }
    }
}

// --- Generator: CerealField ---

/// Lets derived records nest inside other records and `Vec`s.
fn generate_field(name: &syn::Ident, generics: &syn::Generics) -> proc_macro2::TokenStream {
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    quote! {
        impl #impl_generics ::cereal::CerealField for #name #ty_generics #where_clause {
            fn blank_field() -> ::cereal::Result<Self> {
                <Self as ::cereal::Cerealizable>::blank()
            }

            fn put_field(&self, buf: &mut ::cereal::ChunkedBuffer) -> ::cereal::Result<()> {
                ::cereal::Cerealizable::cerealize_to(self, buf)
            }

            fn get_field(buf: &mut ::cereal::ChunkedBuffer) -> ::cereal::Result<Self> {
                <Self as ::cereal::Cerealizable>::uncerealize(buf)
            }
        }
    }
}
