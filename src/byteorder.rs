pub trait WriteBytesLe {
    fn write_le(&self, dst: &mut Vec<u8>);
}

pub trait WriteBytesBe {
    fn write_be(&self, dst: &mut Vec<u8>);
}

macro_rules! impl_num_le_be {
    ($($t:ty),+) => { $(
        impl WriteBytesLe for $t { #[inline] fn write_le(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_le_bytes()); }}
        impl WriteBytesBe for $t { #[inline] fn write_be(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_be_bytes()); }}
    )+ }
}

impl_num_le_be!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

#[macro_export]
macro_rules! impl_collection {
    ($trait:ident, $method:ident) => {
        impl<T: $trait> $trait for Vec<T> {
            #[inline]
            fn $method(&self, dst: &mut Vec<u8>) {
                self.iter().for_each(|item| item.$method(dst));
            }
        }
        impl<T: $trait, const N: usize> $trait for [T; N] {
            #[inline]
            fn $method(&self, dst: &mut Vec<u8>) {
                self.iter().for_each(|item| item.$method(dst));
            }
        }
    };
}

impl_collection!(WriteBytesLe, write_le);
impl_collection!(WriteBytesBe, write_be);

#[macro_export]
macro_rules! impl_u32_enum {
    ($t:ty) => {
        impl WriteBytesLe for $t {
            fn write_le(&self, dst: &mut Vec<u8>) {
                dst.extend_from_slice(&(*self as u32).to_le_bytes())
            }
        }
        impl WriteBytesBe for $t {
            fn write_be(&self, dst: &mut Vec<u8>) {
                dst.extend_from_slice(&(*self as u32).to_be_bytes())
            }
        }
    };
}

#[macro_export]
macro_rules! join_bytes_le {
    ( $($value:expr),+ $(,)? ) => {{
        let mut vec = Vec::<u8>::new();
        $( $value.write_le(&mut vec); )+
        vec
    }};
}

#[macro_export]
macro_rules! join_bytes_be {
    ( $($value:expr),+ $(,)? ) => {{
        let mut vec = Vec::<u8>::new();
        $( $value.write_be(&mut vec); )+
        vec
    }};
}

#[allow(unused_imports)]
pub use {join_bytes_be, join_bytes_le};

/// Big-endian bytes of `value`.
pub fn to_be_vec<T: WriteBytesBe + ?Sized>(value: &T) -> Vec<u8> {
    let mut vec = Vec::new();
    value.write_be(&mut vec);
    vec
}
