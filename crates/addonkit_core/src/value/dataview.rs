use super::typedarray::read_window;
use super::{JsArrayBuffer, TypedValue};
use crate::env::Env;
use crate::error::AddonResult;
use crate::host::DataViewInfo;
use crate::types::JsType;

js_value_type!(
    /// `DataView` over an `ArrayBuffer`.
    JsDataView,
    JsType::DataView,
    |value| {
        let env = value.env();
        env.check(env.host().is_dataview(value.raw()))
    }
);
object_like!(JsDataView);

impl<'h> JsDataView<'h> {
    /// Fails when `byte_offset + byte_length` exceeds the buffer.
    pub fn new(
        env: Env<'h>,
        arraybuffer: &JsArrayBuffer<'h>,
        byte_offset: usize,
        byte_length: usize,
    ) -> AddonResult<Self> {
        let raw = env.check(env.host().create_dataview(
            byte_length,
            arraybuffer.raw(),
            byte_offset,
        ))?;
        Ok(Self(env.value(raw)))
    }

    fn info(&self) -> AddonResult<DataViewInfo> {
        let env = self.env();
        env.check(env.host().get_dataview_info(self.raw()))
    }

    pub fn byte_length(&self) -> AddonResult<usize> {
        Ok(self.info()?.byte_length)
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

    pub fn to_bytes(&self) -> AddonResult<Vec<u8>> {
        let info = self.info()?;
        read_window(&self.arraybuffer()?, info.byte_offset, info.byte_length)
    }
}

#[cfg(test)]
mod tests {
    use super::JsDataView;
    use crate::env::Env;
    use crate::host::MemoryHost;
    use crate::value::JsArrayBuffer;

    #[test]
    fn view_window_and_bounds() {
        let host = MemoryHost::new();
        let env = Env::new(&host);
        let buffer = JsArrayBuffer::from_vec(env, vec![1, 2, 3, 4, 5]).expect("buffer");
        let view = JsDataView::new(env, &buffer, 1, 3).expect("view");
        assert_eq!(view.to_bytes().expect("bytes"), vec![2, 3, 4]);
        assert_eq!(view.byte_offset().expect("offset"), 1);

        let err = JsDataView::new(env, &buffer, 4, 2).expect_err("past the end");
        assert!(err.to_string().starts_with("byte_offset + byte_length"));
    }
}
