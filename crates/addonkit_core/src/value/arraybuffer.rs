use crate::env::Env;
use crate::error::{AddonError, AddonResult};
use crate::status::Status;
use crate::types::JsType;
use log::debug;

js_value_type!(
    /// Raw `ArrayBuffer`.
    JsArrayBuffer,
    JsType::ArrayBuffer,
    |value| {
        let env = value.env();
        env.check(env.host().is_arraybuffer(value.raw()))
    }
);
object_like!(JsArrayBuffer);

impl<'h> JsArrayBuffer<'h> {
    /// Zero-filled buffer of `length` bytes.
    pub fn new(env: Env<'h>, length: usize) -> AddonResult<Self> {
        let raw = env.check(env.host().create_arraybuffer(length))?;
        Ok(Self(env.value(raw)))
    }

    /// Hands `data` to JS without copying; runtimes that refuse external
    /// memory get a copy instead.
    pub fn from_vec(env: Env<'h>, mut data: Vec<u8>) -> AddonResult<Self> {
        match env.host().create_external_arraybuffer(&mut data) {
            Ok(raw) => Ok(Self(env.value(raw))),
            Err(Status::NoExternalBuffersAllowed) => {
                debug!(
                    "event=external_buffer_fallback module=arraybuffer status=ok bytes={}",
                    data.len()
                );
                let buffer = Self::new(env, data.len())?;
                buffer.with_data_mut(|bytes| bytes.copy_from_slice(&data))?;
                Ok(buffer)
            }
            Err(status) => env.check(Err(status)),
        }
    }

    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> AddonResult<R> {
        let env = self.env();
        let mut f = Some(f);
        let mut result = None;
        env.check(env.host().arraybuffer_data(self.raw(), &mut |bytes| {
            if let Some(f) = f.take() {
                result = Some(f(bytes));
            }
        }))?;
        result.ok_or_else(|| AddonError::invalid_arg("arraybuffer data unavailable"))
    }

    pub fn byte_length(&self) -> AddonResult<usize> {
        self.with_data_mut(|bytes| bytes.len())
    }

    pub fn to_vec(&self) -> AddonResult<Vec<u8>> {
        self.with_data_mut(|bytes| bytes.to_vec())
    }

    pub fn detach(&self) -> AddonResult<()> {
        let env = self.env();
        env.check(env.host().detach_arraybuffer(self.raw()))
    }

    pub fn is_detached(&self) -> AddonResult<bool> {
        let env = self.env();
        env.check(env.host().is_detached_arraybuffer(self.raw()))
    }
}

#[cfg(test)]
mod tests {
    use super::JsArrayBuffer;
    use crate::env::Env;
    use crate::host::MemoryHost;

    #[test]
    fn external_data_falls_back_to_copy() {
        let host = MemoryHost::new();
        host.set_external_buffers_allowed(false);
        let env = Env::new(&host);
        let buffer = JsArrayBuffer::from_vec(env, vec![1, 2, 3]).expect("copied buffer");
        assert_eq!(buffer.to_vec().expect("bytes"), vec![1, 2, 3]);
    }

    #[test]
    fn detach_empties_buffer() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let buffer = JsArrayBuffer::from_vec(env, vec![7; 4]).expect("buffer");
        assert_eq!(buffer.byte_length().expect("len"), 4);
        buffer.detach().expect("detach");
        assert!(buffer.is_detached().expect("detached"));
        assert_eq!(buffer.byte_length().expect("len"), 0);
    }
}
