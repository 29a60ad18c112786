//! The binary frame codec.
//!
//! Records are length-prefixed and tag-dispatched:
//!
//! ```text
//! u32  record length (bytes of tag + payload)
//! u32  frame tag
//! ...  payload, per tag
//! ```
//!
//! Integers are big-endian: `u32` for tags, counts, ids and indices; `u64`
//! for timestamps and string/blob lengths. Strings are length-prefixed UTF-8,
//! blobs are length-prefixed raw bytes, optional fields carry a `u32`
//! presence flag. Unknown tags (e.g. the input-tracker range 5..=9) are
//! skipped losslessly using the record length.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frame::{tag, Asset, Frame, SheetOp};
use crate::op::TextEdit;
use crate::vdom::{VAdoptedSheet, VDocument, VElement, VNode};

/// Nesting bound for wire trees, so a malformed stream cannot blow the stack.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ends mid-record. Not an error for an incremental decoder:
    /// wait for more input.
    #[error("buffer underflow: needed {needed} bytes, had {available}")]
    BufferUnderflow { needed: usize, available: usize },
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append one frame to `out` in record form.
pub fn encode_frame(frame: &Frame, out: &mut BytesMut) {
    let mut payload = BytesMut::new();
    match frame {
        Frame::Timestamp { epoch_ms } => payload.put_u64(*epoch_ms),
        Frame::Keyframe {
            document,
            asset_count,
        } => {
            put_vdocument(&mut payload, document);
            payload.put_u32(*asset_count);
        }
        Frame::Asset(asset) => {
            payload.put_u32(asset.id);
            put_string(&mut payload, &asset.url);
            put_opt_string(&mut payload, asset.mime.as_deref());
            put_blob(&mut payload, &asset.bytes);
        }
        Frame::ViewportResized { width, height } => {
            payload.put_u32(*width);
            payload.put_u32(*height);
        }
        Frame::ScrollOffsetChanged { x, y } => {
            payload.put_u32(*x);
            payload.put_u32(*y);
        }
        Frame::DomNodeAdded {
            parent_id,
            index,
            node,
            asset_count,
        } => {
            payload.put_u32(*parent_id);
            payload.put_u32(*index);
            put_vnode(&mut payload, node);
            payload.put_u32(*asset_count);
        }
        Frame::DomNodeRemoved { node_id } => payload.put_u32(*node_id),
        Frame::DomAttributeChanged {
            node_id,
            name,
            value,
        } => {
            payload.put_u32(*node_id);
            put_string(&mut payload, name);
            put_string(&mut payload, value);
        }
        Frame::DomAttributeRemoved { node_id, name } => {
            payload.put_u32(*node_id);
            put_string(&mut payload, name);
        }
        Frame::DomTextChanged { node_id, edits } => {
            payload.put_u32(*node_id);
            payload.put_u32(edits.len() as u32);
            for edit in edits {
                put_text_edit(&mut payload, edit);
            }
        }
        Frame::DomNodeResized {
            node_id,
            width,
            height,
        } => {
            payload.put_u32(*node_id);
            payload.put_u32(*width);
            payload.put_u32(*height);
        }
        Frame::StyleSheetChanged {
            sheet_id,
            adopted,
            op,
        } => {
            payload.put_u32(*sheet_id);
            payload.put_u32(*adopted as u32);
            put_sheet_op(&mut payload, op);
        }
        // Opaque frames round-trip as an empty payload under their tag.
        Frame::Unsupported { .. } => {}
    }

    out.put_u32(payload.len() as u32 + 4);
    out.put_u32(frame.tag());
    out.extend_from_slice(&payload);
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u64(s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn put_opt_string(buf: &mut BytesMut, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.put_u32(1);
            put_string(buf, s);
        }
        None => buf.put_u32(0),
    }
}

fn put_blob(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u64(bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn put_text_edit(buf: &mut BytesMut, edit: &TextEdit) {
    match edit {
        TextEdit::Insert { index, content } => {
            buf.put_u32(0);
            buf.put_u32(*index);
            put_string(buf, content);
        }
        TextEdit::Remove { index, count } => {
            buf.put_u32(1);
            buf.put_u32(*index);
            buf.put_u32(*count);
        }
    }
}

fn put_sheet_op(buf: &mut BytesMut, op: &SheetOp) {
    match op {
        SheetOp::RulesInsert { index, rule } => {
            buf.put_u32(0);
            buf.put_u32(*index);
            put_string(buf, rule);
        }
        SheetOp::RulesDelete { index } => {
            buf.put_u32(1);
            buf.put_u32(*index);
        }
        SheetOp::Replace { text } => {
            buf.put_u32(2);
            put_string(buf, text);
        }
        SheetOp::AdoptedListChanged { sheet_ids } => {
            buf.put_u32(3);
            buf.put_u32(sheet_ids.len() as u32);
            for id in sheet_ids {
                buf.put_u32(*id);
            }
        }
        SheetOp::SheetAdded { text } => {
            buf.put_u32(4);
            put_string(buf, text);
        }
        SheetOp::SheetRemoved => buf.put_u32(5),
    }
}

fn put_vnode(buf: &mut BytesMut, node: &VNode) {
    match node {
        VNode::Text { id, text } => {
            buf.put_u32(0);
            buf.put_u32(*id);
            put_string(buf, text);
        }
        VNode::Cdata { id, data } => {
            buf.put_u32(1);
            buf.put_u32(*id);
            put_string(buf, data);
        }
        VNode::Comment { id, data } => {
            buf.put_u32(2);
            buf.put_u32(*id);
            put_string(buf, data);
        }
        VNode::ProcessingInstruction { id, target, data } => {
            buf.put_u32(3);
            buf.put_u32(*id);
            put_string(buf, target);
            put_string(buf, data);
        }
        VNode::DocumentType {
            id,
            name,
            public_id,
            system_id,
        } => {
            buf.put_u32(4);
            buf.put_u32(*id);
            put_string(buf, name);
            put_opt_string(buf, public_id.as_deref());
            put_opt_string(buf, system_id.as_deref());
        }
        VNode::Element(el) => {
            buf.put_u32(5);
            buf.put_u32(el.id);
            put_string(buf, &el.tag);
            put_opt_string(buf, el.namespace.as_deref());
            buf.put_u32(el.attributes.len() as u32);
            for (name, value) in &el.attributes {
                put_string(buf, name);
                put_string(buf, value);
            }
            buf.put_u32(el.children.len() as u32);
            for child in &el.children {
                put_vnode(buf, child);
            }
            match &el.shadow {
                Some(shadow) => {
                    buf.put_u32(1);
                    buf.put_u32(shadow.len() as u32);
                    for child in shadow {
                        put_vnode(buf, child);
                    }
                }
                None => buf.put_u32(0),
            }
        }
    }
}

fn put_vdocument(buf: &mut BytesMut, doc: &VDocument) {
    buf.put_u32(doc.id);
    buf.put_u32(doc.adopted_sheets.len() as u32);
    for sheet in &doc.adopted_sheets {
        buf.put_u32(sheet.id);
        put_opt_string(buf, sheet.media.as_deref());
        put_string(buf, &sheet.text);
    }
    buf.put_u32(doc.children.len() as u32);
    for child in &doc.children {
        put_vnode(buf, child);
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.buf.len() - self.pos;
        if available < n {
            return Err(DecodeError::BufferUnderflow {
                needed: n,
                available,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn bool_(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u32()? != 0)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u64()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    fn opt_string(&mut self) -> Result<Option<String>, DecodeError> {
        if self.bool_()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    fn blob(&mut self) -> Result<Bytes, DecodeError> {
        let len = self.u64()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }
}

fn read_text_edit(r: &mut Reader) -> Result<TextEdit, DecodeError> {
    match r.u32()? {
        0 => Ok(TextEdit::Insert {
            index: r.u32()?,
            content: r.string()?,
        }),
        1 => Ok(TextEdit::Remove {
            index: r.u32()?,
            count: r.u32()?,
        }),
        _ => Err(DecodeError::Malformed("unknown text edit kind")),
    }
}

fn read_sheet_op(r: &mut Reader) -> Result<SheetOp, DecodeError> {
    match r.u32()? {
        0 => Ok(SheetOp::RulesInsert {
            index: r.u32()?,
            rule: r.string()?,
        }),
        1 => Ok(SheetOp::RulesDelete { index: r.u32()? }),
        2 => Ok(SheetOp::Replace { text: r.string()? }),
        3 => {
            let count = r.u32()? as usize;
            let mut sheet_ids = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                sheet_ids.push(r.u32()?);
            }
            Ok(SheetOp::AdoptedListChanged { sheet_ids })
        }
        4 => Ok(SheetOp::SheetAdded { text: r.string()? }),
        5 => Ok(SheetOp::SheetRemoved),
        _ => Err(DecodeError::Malformed("unknown sheet op kind")),
    }
}

fn read_vnode(r: &mut Reader, depth: usize) -> Result<VNode, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::Malformed("vnode tree too deep"));
    }
    match r.u32()? {
        0 => Ok(VNode::Text {
            id: r.u32()?,
            text: r.string()?,
        }),
        1 => Ok(VNode::Cdata {
            id: r.u32()?,
            data: r.string()?,
        }),
        2 => Ok(VNode::Comment {
            id: r.u32()?,
            data: r.string()?,
        }),
        3 => Ok(VNode::ProcessingInstruction {
            id: r.u32()?,
            target: r.string()?,
            data: r.string()?,
        }),
        4 => Ok(VNode::DocumentType {
            id: r.u32()?,
            name: r.string()?,
            public_id: r.opt_string()?,
            system_id: r.opt_string()?,
        }),
        5 => {
            let id = r.u32()?;
            let tag = r.string()?;
            let namespace = r.opt_string()?;
            let attr_count = r.u32()? as usize;
            let mut attributes = Vec::with_capacity(attr_count.min(1024));
            for _ in 0..attr_count {
                let name = r.string()?;
                let value = r.string()?;
                attributes.push((name, value));
            }
            let child_count = r.u32()? as usize;
            let mut children = Vec::with_capacity(child_count.min(1024));
            for _ in 0..child_count {
                children.push(read_vnode(r, depth + 1)?);
            }
            let shadow = if r.bool_()? {
                let count = r.u32()? as usize;
                let mut nodes = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    nodes.push(read_vnode(r, depth + 1)?);
                }
                Some(nodes)
            } else {
                None
            };
            Ok(VNode::Element(VElement {
                id,
                tag,
                namespace,
                attributes,
                children,
                shadow,
            }))
        }
        _ => Err(DecodeError::Malformed("unknown vnode kind")),
    }
}

fn read_vdocument(r: &mut Reader) -> Result<VDocument, DecodeError> {
    let id = r.u32()?;
    let sheet_count = r.u32()? as usize;
    let mut adopted_sheets = Vec::with_capacity(sheet_count.min(1024));
    for _ in 0..sheet_count {
        adopted_sheets.push(VAdoptedSheet {
            id: r.u32()?,
            media: r.opt_string()?,
            text: r.string()?,
        });
    }
    let child_count = r.u32()? as usize;
    let mut children = Vec::with_capacity(child_count.min(1024));
    for _ in 0..child_count {
        children.push(read_vnode(r, 0)?);
    }
    Ok(VDocument {
        id,
        adopted_sheets,
        children,
    })
}

/// Decode one frame from the front of `buf`. Returns the frame and the number
/// of bytes consumed. [`DecodeError::BufferUnderflow`] means the buffer ends
/// mid-record; callers with a stream should wait for more bytes.
pub fn decode_frame(buf: &[u8]) -> Result<(Frame, usize), DecodeError> {
    let mut header = Reader::new(buf);
    let record_len = header.u32()? as usize;
    if record_len < 4 {
        return Err(DecodeError::Malformed("record length below tag size"));
    }
    let available = buf.len() - 4;
    if available < record_len {
        return Err(DecodeError::BufferUnderflow {
            needed: record_len,
            available,
        });
    }

    let mut r = Reader::new(&buf[4..4 + record_len]);
    let frame_tag = r.u32()?;
    // A read running off the end of a fully-buffered record is a malformed
    // record, not an underflow the stream can recover from by waiting.
    let frame = parse_record(frame_tag, &mut r).map_err(|err| match err {
        DecodeError::BufferUnderflow { .. } => DecodeError::Malformed("record truncated"),
        other => other,
    })?;
    Ok((frame, 4 + record_len))
}

fn parse_record(frame_tag: u32, r: &mut Reader) -> Result<Frame, DecodeError> {
    let frame = match frame_tag {
        tag::TIMESTAMP => Frame::Timestamp { epoch_ms: r.u64()? },
        tag::KEYFRAME => Frame::Keyframe {
            document: read_vdocument(r)?,
            asset_count: r.u32()?,
        },
        tag::ASSET => Frame::Asset(Asset {
            id: r.u32()?,
            url: r.string()?,
            mime: r.opt_string()?,
            bytes: r.blob()?,
        }),
        tag::VIEWPORT_RESIZED => Frame::ViewportResized {
            width: r.u32()?,
            height: r.u32()?,
        },
        tag::SCROLL_OFFSET_CHANGED => Frame::ScrollOffsetChanged {
            x: r.u32()?,
            y: r.u32()?,
        },
        tag::DOM_NODE_ADDED => Frame::DomNodeAdded {
            parent_id: r.u32()?,
            index: r.u32()?,
            node: read_vnode(r, 0)?,
            asset_count: r.u32()?,
        },
        tag::DOM_NODE_REMOVED => Frame::DomNodeRemoved { node_id: r.u32()? },
        tag::DOM_ATTRIBUTE_CHANGED => Frame::DomAttributeChanged {
            node_id: r.u32()?,
            name: r.string()?,
            value: r.string()?,
        },
        tag::DOM_ATTRIBUTE_REMOVED => Frame::DomAttributeRemoved {
            node_id: r.u32()?,
            name: r.string()?,
        },
        tag::DOM_TEXT_CHANGED => {
            let node_id = r.u32()?;
            let count = r.u32()? as usize;
            let mut edits = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                edits.push(read_text_edit(r)?);
            }
            Frame::DomTextChanged { node_id, edits }
        }
        tag::DOM_NODE_RESIZED => Frame::DomNodeResized {
            node_id: r.u32()?,
            width: r.u32()?,
            height: r.u32()?,
        },
        tag::STYLE_SHEET_CHANGED => Frame::StyleSheetChanged {
            sheet_id: r.u32()?,
            adopted: r.bool_()?,
            op: read_sheet_op(r)?,
        },
        // Foreign record (input tracker etc). The length prefix lets us skip
        // the payload without understanding it.
        other => Frame::Unsupported { tag: other },
    };
    Ok(frame)
}

/// Incremental decoder for a chunked byte stream.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw stream bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if one is buffered. `Ok(None)` means
    /// the buffer currently ends mid-record.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        match decode_frame(&self.buf) {
            Ok((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            Err(DecodeError::BufferUnderflow { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Bytes currently buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf);
        let (decoded, consumed) = decode_frame(&buf).expect("decodes");
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, frame);
    }

    fn sample_element() -> VNode {
        VNode::Element(VElement {
            id: 7,
            tag: "img".to_string(),
            namespace: None,
            attributes: vec![
                ("src".to_string(), "asset:5".to_string()),
                ("alt".to_string(), "a picture".to_string()),
            ],
            children: vec![VNode::Text {
                id: 8,
                text: "fallback".to_string(),
            }],
            shadow: Some(vec![VNode::Comment {
                id: 9,
                data: "shadow".to_string(),
            }]),
        })
    }

    #[test]
    fn roundtrips_every_frame_kind() {
        roundtrip(Frame::Timestamp { epoch_ms: 1_700_000_000_123 });
        roundtrip(Frame::Keyframe {
            document: VDocument {
                id: 1,
                adopted_sheets: vec![VAdoptedSheet {
                    id: 12,
                    media: Some("screen".to_string()),
                    text: ".a{color:red}".to_string(),
                }],
                children: vec![sample_element()],
            },
            asset_count: 3,
        });
        roundtrip(Frame::Asset(Asset {
            id: 5,
            url: "https://example.com/a.png".to_string(),
            mime: Some("image/png".to_string()),
            bytes: Bytes::from_static(&[1, 2, 3, 4]),
        }));
        roundtrip(Frame::ViewportResized {
            width: 1280,
            height: 720,
        });
        roundtrip(Frame::ScrollOffsetChanged { x: 0, y: 640 });
        roundtrip(Frame::DomNodeAdded {
            parent_id: 1,
            index: 0,
            node: sample_element(),
            asset_count: 1,
        });
        roundtrip(Frame::DomNodeRemoved { node_id: 4 });
        roundtrip(Frame::DomAttributeChanged {
            node_id: 2,
            name: "class".to_string(),
            value: "active".to_string(),
        });
        roundtrip(Frame::DomAttributeRemoved {
            node_id: 2,
            name: "class".to_string(),
        });
        roundtrip(Frame::DomTextChanged {
            node_id: 3,
            edits: vec![
                TextEdit::Insert {
                    index: 0,
                    content: "hi".to_string(),
                },
                TextEdit::Remove { index: 2, count: 5 },
            ],
        });
        roundtrip(Frame::DomNodeResized {
            node_id: 6,
            width: 300,
            height: 150,
        });
        roundtrip(Frame::StyleSheetChanged {
            sheet_id: 2,
            adopted: true,
            op: SheetOp::RulesInsert {
                index: 0,
                rule: "p{color:red}".to_string(),
            },
        });
        roundtrip(Frame::StyleSheetChanged {
            sheet_id: 1,
            adopted: false,
            op: SheetOp::AdoptedListChanged {
                sheet_ids: vec![3, 4, 5],
            },
        });
    }

    #[test]
    fn truncated_record_reports_underflow() {
        let mut buf = BytesMut::new();
        encode_frame(&Frame::DomNodeRemoved { node_id: 4 }, &mut buf);
        for cut in 0..buf.len() {
            let err = decode_frame(&buf[..cut]).unwrap_err();
            assert!(
                matches!(err, DecodeError::BufferUnderflow { .. }),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn unknown_tags_are_skipped_losslessly() {
        // Hand-build a record with input-tracker tag 7 and an opaque payload.
        let mut buf = BytesMut::new();
        buf.put_u32(4 + 12);
        buf.put_u32(7);
        buf.extend_from_slice(&[0xAB; 12]);
        encode_frame(&Frame::DomNodeRemoved { node_id: 9 }, &mut buf);

        let (first, consumed) = decode_frame(&buf).unwrap();
        assert_eq!(first, Frame::Unsupported { tag: 7 });
        let (second, _) = decode_frame(&buf[consumed..]).unwrap();
        assert_eq!(second, Frame::DomNodeRemoved { node_id: 9 });
    }

    #[test]
    fn incremental_decoding_across_chunk_boundaries() {
        let mut stream = BytesMut::new();
        encode_frame(&Frame::Timestamp { epoch_ms: 42 }, &mut stream);
        encode_frame(
            &Frame::DomAttributeChanged {
                node_id: 1,
                name: "id".to_string(),
                value: "new".to_string(),
            },
            &mut stream,
        );

        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        // Feed one byte at a time.
        for byte in stream.iter() {
            decoder.push(std::slice::from_ref(byte));
            while let Some(frame) = decoder.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Timestamp { epoch_ms: 42 });
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn garbage_vnode_kind_is_malformed_not_underflow() {
        let mut buf = BytesMut::new();
        // DomNodeAdded whose vnode kind is bogus
        let mut payload = BytesMut::new();
        payload.put_u32(1); // parent
        payload.put_u32(0); // index
        payload.put_u32(99); // vnode kind
        buf.put_u32(payload.len() as u32 + 4);
        buf.put_u32(tag::DOM_NODE_ADDED);
        buf.extend_from_slice(&payload);

        assert_eq!(
            decode_frame(&buf).unwrap_err(),
            DecodeError::Malformed("unknown vnode kind")
        );
    }
}
