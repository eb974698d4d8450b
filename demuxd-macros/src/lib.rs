use darling::Error;
use darling::ast::NestedMeta;
use quote::quote;
use syn::{Data, DeriveInput, Fields, ItemStruct, parse_macro_input};

use proc_macro::TokenStream;

/// Writes every field in declaration order through `WriteBytesBe` and
/// `WriteBytesLe`.
#[proc_macro_derive(ToBytes)]
pub fn derive_to_bytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let fields: Vec<syn::Member> = match input.data {
        Data::Struct(ref s) => match s.fields {
            Fields::Named(ref nf) => nf
                .named
                .iter()
                .filter_map(|f| f.ident.clone())
                .map(syn::Member::from)
                .collect(),
            Fields::Unnamed(ref uf) => (0..uf.unnamed.len())
                .map(|i| syn::Index::from(i).into())
                .collect(),
            Fields::Unit => Vec::new(),
        },
        _ => {
            return syn::Error::new_spanned(&name, "ToBytes can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let expanded = quote! {
        impl crate::byteorder::WriteBytesBe for #name {
            fn write_be(&self, dst: &mut Vec<u8>) {
                #( crate::byteorder::WriteBytesBe::write_be(&self.#fields, dst); )*
            }
        }

        impl crate::byteorder::WriteBytesLe for #name {
            fn write_le(&self, dst: &mut Vec<u8>) {
                #( crate::byteorder::WriteBytesLe::write_le(&self.#fields, dst); )*
            }
        }
    };

    TokenStream::from(expanded)
}

/// Implements `IndexChunk` for a `ToBytes` struct, e.g.
/// `#[index_chunk(b"trak")]`. The chunk body is the big-endian encoding of
/// the struct.
#[proc_macro_attribute]
pub fn index_chunk(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match NestedMeta::parse_meta_list(attr.into()) {
        Ok(v) => v,
        Err(e) => {
            return TokenStream::from(Error::from(e).write_errors());
        }
    };

    let type_bytes = match args.first() {
        Some(NestedMeta::Lit(syn::Lit::ByteStr(bs))) if bs.value().len() == 4 => bs.value(),
        Some(other) => {
            return syn::Error::new_spanned(other, "index_chunk expects 4 bytes, e.g. b\"smpl\"")
                .to_compile_error()
                .into();
        }
        None => {
            return TokenStream::from(
                Error::custom("index_chunk expects a chunk type, e.g. b\"smpl\"").write_errors(),
            );
        }
    };

    let input = parse_macro_input!(item as ItemStruct);
    let name = &input.ident;

    let expanded = quote! {
        #input

        impl crate::index::IndexChunk for #name {
            fn chunk_type(&self) -> &[u8; 4] {
                const BYTES: [u8; 4] = [#(#type_bytes),*];
                &BYTES
            }

            fn chunk_data(&self) -> Vec<u8> {
                let mut vec = Vec::new();
                crate::byteorder::WriteBytesBe::write_be(self, &mut vec);
                vec
            }
        }
    };
    TokenStream::from(expanded)
}
