use super::{JsArrayBuffer, TypedValue};
use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::host::TypedArrayInfo;
use crate::types::{JsType, TypedArrayKind};

js_value_type!(
    /// Typed array view (`Uint8Array`, `Float64Array`, ...). Node buffers
    /// also pass this check.
    JsTypedArray,
    JsType::TypedArray,
    |value| {
        let env = value.env();
        env.check(env.host().is_typedarray(value.raw()))
    }
);
object_like!(JsTypedArray);

impl<'h> JsTypedArray<'h> {
    /// Creates a view of `length` elements starting at `byte_offset`.
    ///
    /// A misaligned offset or a range past the end of `arraybuffer` fails
    /// with the engine's `RangeError` message.
    pub fn new(
        env: Env<'h>,
        kind: TypedArrayKind,
        length: usize,
        arraybuffer: &JsArrayBuffer<'h>,
        byte_offset: usize,
    ) -> AddonResult<Self> {
        let raw = env.check(env.host().create_typedarray(
            kind,
            length,
            arraybuffer.raw(),
            byte_offset,
        ))?;
        Ok(Self(env.value(raw)))
    }

    /// Copies `bytes` into a fresh buffer and views it as `kind`.
    ///
    /// # Errors
    /// - `InvalidArg` when `bytes` is not a whole number of elements.
    pub fn from_bytes(env: Env<'h>, kind: TypedArrayKind, bytes: &[u8]) -> AddonResult<Self> {
        let size = kind.element_size();
        if bytes.len() % size != 0 {
            return Err(AddonError::invalid_arg(format!(
                "{} bytes do not fill whole {} elements of {size} bytes",
                bytes.len(),
                kind.js_name()
            )));
        }
        let arraybuffer = JsArrayBuffer::from_vec(env, bytes.to_vec())?;
        Self::new(env, kind, bytes.len() / size, &arraybuffer, 0)
    }

    pub fn info(&self) -> AddonResult<TypedArrayInfo> {
        let env = self.env();
        env.check(env.host().get_typedarray_info(self.raw()))
    }

    pub fn kind(&self) -> AddonResult<TypedArrayKind> {
        Ok(self.info()?.kind)
    }

    /// Element count.
    pub fn len(&self) -> AddonResult<usize> {
        Ok(self.info()?.length)
    }

    pub fn is_empty(&self) -> AddonResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn byte_length(&self) -> AddonResult<usize> {
        let info = self.info()?;
        Ok(info.length * info.kind.element_size())
    }

    pub fn byte_offset(&self) -> AddonResult<usize> {
        Ok(self.info()?.byte_offset)
    }

    pub fn arraybuffer(&self) -> AddonResult<JsArrayBuffer<'h>> {
        let info = self.info()?;
        Ok(JsArrayBuffer::from_value_unchecked(
            self.env().value(info.arraybuffer),
        ))
    }

    /// Copies the viewed bytes; a detached buffer yields no bytes.
    pub fn to_bytes(&self) -> AddonResult<Vec<u8>> {
        let info = self.info()?;
        let length = info.length * info.kind.element_size();
        read_window(&self.arraybuffer()?, info.byte_offset, length)
    }
}

pub(crate) fn read_window(
    arraybuffer: &JsArrayBuffer<'_>,
    byte_offset: usize,
    byte_length: usize,
) -> AddonResult<Vec<u8>> {
    arraybuffer.with_data_mut(|bytes| {
        bytes
            .get(byte_offset..byte_offset + byte_length)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::JsTypedArray;
    use crate::env::Env;
    use crate::error::AddonError;
    use crate::host::MemoryHost;
    use crate::types::TypedArrayKind;
    use crate::value::JsArrayBuffer;

    #[test]
    fn view_reports_layout_and_bytes() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let buffer = JsArrayBuffer::from_vec(env, (0..16).collect()).expect("buffer");
        let view = JsTypedArray::new(env, TypedArrayKind::Uint16, 3, &buffer, 4).expect("view");
        assert_eq!(view.kind().expect("kind"), TypedArrayKind::Uint16);
        assert_eq!(view.len().expect("len"), 3);
        assert_eq!(view.byte_length().expect("bytes"), 6);
        assert_eq!(view.byte_offset().expect("offset"), 4);
        assert_eq!(view.to_bytes().expect("copy"), vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn rejects_misaligned_offset_and_overflow() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let buffer = JsArrayBuffer::new(env, 8).expect("buffer");

        let misaligned = JsTypedArray::new(env, TypedArrayKind::Float64, 1, &buffer, 3)
            .expect_err("misaligned");
        assert_eq!(
            misaligned,
            AddonError::Exception("start offset of Float64Array should be a multiple of 8".to_string())
        );

        let overflow = JsTypedArray::new(env, TypedArrayKind::Int32, 3, &buffer, 0)
            .expect_err("too long");
        assert_eq!(
            overflow,
            AddonError::Exception("Invalid typed array length".to_string())
        );
        assert!(!env.is_exception_pending().expect("pending"));
    }

    #[test]
    fn from_bytes_rejects_partial_elements() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let err = JsTypedArray::from_bytes(env, TypedArrayKind::Int32, &[1, 2, 3, 4, 5])
            .expect_err("five bytes are not whole Int32 elements");
        assert!(matches!(err, AddonError::InvalidArg(_)));

        let whole = JsTypedArray::from_bytes(env, TypedArrayKind::Int32, &[0; 8]).expect("view");
        assert_eq!(whole.len().expect("len"), 2);
    }
}
