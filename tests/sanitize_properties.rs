use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use blotter::{
    application::{
        blobs::BlobStore,
        sanitize::{Sanitizer, SanitizerConfig},
    },
    domain::attachments::ShortRef,
};
use proptest::prelude::*;

fn sanitizer() -> Sanitizer {
    Sanitizer::new(Arc::new(BlobStore::new()), SanitizerConfig::default())
}

fn prose() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-zA-Z0-9 #*_.,:-]{0,40}", 0..8).prop_map(|lines| lines.join("\n"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sanitized_text_never_keeps_valid_data_uris(
        before in prose(),
        after in prose(),
        bytes in proptest::collection::vec(any::<u8>(), 1..96),
        alt in "[a-z]{1,12}",
        shape in 0usize..6,
    ) {
        let uri = format!("data:image/png;base64,{}", STANDARD.encode(&bytes));
        let embedded = match shape {
            0 => format!("![{alt}]({uri})"),
            1 => format!("[{alt}]({uri})"),
            2 => format!("see ({uri}) here"),
            3 => format!("<img src={uri}>"),
            4 => format!(r#"<img alt="{alt}" src="{uri}">"#),
            _ => format!("{alt} {uri}"),
        };
        let text = format!("{before}\n{embedded}\n{after}");

        let sanitizer = sanitizer();
        let outcome = sanitizer.sanitize(&text, &[]);

        prop_assert!(!outcome.text.contains("data:image/png;base64,"));
        prop_assert_eq!(outcome.new_attachments.len(), 1);
        let reference = &outcome.new_attachments[0].reference;
        prop_assert!(ShortRef::looks_like(reference.as_str()));
        let stored = sanitizer.blobs().get(reference.as_str()).expect("stored payload");
        prop_assert_eq!(stored.bytes().as_ref(), bytes.as_slice());
    }

    #[test]
    fn sanitizing_is_idempotent(
        body in prose(),
        bytes in proptest::collection::vec(any::<u8>(), 1..64),
        depth in 0usize..8,
    ) {
        let uri = format!("data:image/gif;base64,{}", STANDARD.encode(&bytes));
        let comment = (0..depth).fold("<!--x-->".to_string(), |inner, _| format!("<!{inner}--x-->"));
        let text = format!("{body} {comment}\n\n![pic]({uri})\n");

        let sanitizer = sanitizer();
        let first = sanitizer.sanitize(&text, &[]);
        let second = sanitizer.sanitize(&first.text, &first.new_attachments);

        prop_assert_eq!(&second.text, &first.text);
        prop_assert!(second.new_attachments.is_empty());
        prop_assert_eq!(second.extracted, 0);
    }

    #[test]
    fn plain_prose_is_left_alone(body in "[a-zA-Z0-9 .,]{0,120}") {
        let outcome = sanitizer().sanitize(&body, &[]);
        prop_assert_eq!(outcome.text, body);
        prop_assert!(outcome.anomalies.is_empty());
    }
}
