use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::types::JsType;

js_value_type!(
    /// Node `Buffer`.
    JsBuffer,
    JsType::Buffer,
    |value| {
        let env = value.env();
        env.check(env.host().is_buffer(value.raw()))
    }
);
object_like!(JsBuffer);

impl<'h> JsBuffer<'h> {
    /// Zero-filled buffer of `length` bytes.
    pub fn new(env: Env<'h>, length: usize) -> AddonResult<Self> {
        let raw = env.check(env.host().create_buffer(length))?;
        Ok(Self(env.value(raw)))
    }

    pub fn from_bytes(env: Env<'h>, bytes: &[u8]) -> AddonResult<Self> {
        let raw = env.check(env.host().create_buffer_copy(bytes))?;
        Ok(Self(env.value(raw)))
    }

    /// Runs `f` over the buffer memory.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> AddonResult<R> {
        let env = self.env();
        let mut f = Some(f);
        let mut result = None;
        env.check(env.host().buffer_data(self.raw(), &mut |bytes| {
            if let Some(f) = f.take() {
                result = Some(f(bytes));
            }
        }))?;
        result.ok_or_else(|| AddonError::invalid_arg("buffer data unavailable"))
    }

    pub fn len(&self) -> AddonResult<usize> {
        self.with_data_mut(|bytes| bytes.len())
    }

    pub fn is_empty(&self) -> AddonResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn to_vec(&self) -> AddonResult<Vec<u8>> {
        self.with_data_mut(|bytes| bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::JsBuffer;
    use crate::env::Env;
    use crate::host::MemoryHost;

    #[test]
    fn writes_through_data_view_are_visible() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let buffer = JsBuffer::new(env, 3).expect("buffer");
        assert_eq!(buffer.to_vec().expect("bytes"), vec![0, 0, 0]);
        buffer
            .with_data_mut(|bytes| bytes.copy_from_slice(b"abc"))
            .expect("write");
        assert_eq!(buffer.to_vec().expect("bytes"), b"abc".to_vec());

        let copy = JsBuffer::from_bytes(env, &[9, 8]).expect("copy");
        assert_eq!(copy.len().expect("len"), 2);
    }
}
