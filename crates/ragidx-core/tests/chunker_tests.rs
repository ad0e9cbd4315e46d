use proptest::prelude::*;

use ragidx_core::types::{ChunkMetadata, DocType, Document};
use ragidx_core::{chunk_documents, split_sentences, Chunker};

const PRIVACY: &str = "Privacy matters. Consent is required. Data must be minimized.";
const BIAS: &str = "Bias harms users. Fairness is essential.";

#[test]
fn privacy_document_splits_into_two_overlapping_chunks() {
    let doc = Document::new("privacy.txt", DocType::Guideline, PRIVACY);
    let chunks = Chunker::new(6, 1).chunk_document(&doc);

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].text, "Privacy matters. Consent is required.");
    assert_eq!(chunks[1].text, "Consent is required. Data must be minimized.");
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.metadata.source, "privacy.txt");
        assert_eq!(c.metadata.doc_type, DocType::Guideline);
        assert_eq!(c.metadata.chunk_index, i);
        assert_eq!(c.metadata.total_chunks, 2);
    }
}

#[test]
fn short_document_is_one_chunk() {
    let doc = Document::new("bias.txt", DocType::CaseStudy, BIAS);
    let chunks = Chunker::new(6, 1).chunk_document(&doc);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, BIAS);
}

#[test]
fn extra_metadata_is_copied_to_every_chunk() {
    let mut base = ChunkMetadata {
        source: "s".into(),
        path: "p".into(),
        ..Default::default()
    };
    base.extra.insert("section".into(), "intro".into());
    let chunks = Chunker::new(2, 0).chunk("A b. C d. E f.", &base);
    assert_eq!(chunks.len(), 3);
    assert!(chunks
        .iter()
        .all(|c| c.metadata.extra.get("section").map(String::as_str) == Some("intro")));
}

#[test]
fn parallel_chunking_keeps_in_document_order() {
    let docs: Vec<Document> = (0..12)
        .map(|i| {
            let text = (0..9)
                .map(|s| format!("Doc {i} sentence {s}."))
                .collect::<Vec<_>>()
                .join(" ");
            Document::new(format!("doc{i}.txt"), DocType::Other, text)
        })
        .collect();
    let expected: usize = docs
        .iter()
        .map(|d| Chunker::new(8, 1).chunk_document(d).len())
        .sum();

    let chunks = chunk_documents(docs, 8, 1, 3);
    assert_eq!(chunks.len(), expected);

    for i in 0..12 {
        let source = format!("doc{i}.txt");
        let positions: Vec<usize> = chunks
            .iter()
            .filter(|c| c.metadata.source == source)
            .map(|c| c.metadata.chunk_index)
            .collect();
        let sorted: Vec<usize> = (0..positions.len()).collect();
        assert_eq!(positions, sorted, "chunks of {source} out of order");
    }
}

#[test]
fn zero_workers_still_chunks() {
    let docs = vec![Document::new("a", DocType::Other, PRIVACY)];
    assert_eq!(chunk_documents(docs, 6, 1, 0).len(), 2);
}

fn sentence_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,6}", 1..8).prop_map(|words| format!("{}.", words.join(" ")))
}

proptest! {
    #[test]
    fn chunks_cover_every_sentence_in_order(
        sentences in prop::collection::vec(sentence_strategy(), 1..25),
        chunk_size in 1usize..20,
        overlap in 0usize..4,
    ) {
        let text = sentences.join(" ");
        let chunks = Chunker::new(chunk_size, overlap).chunk(&text, &ChunkMetadata::default());
        let per_chunk: Vec<Vec<String>> =
            chunks.iter().map(|c| split_sentences(&c.text)).collect();

        let mut unique: Vec<String> = per_chunk[0].clone();
        for pair in per_chunk.windows(2) {
            let skip = overlap.min(pair[0].len());
            unique.extend(pair[1][skip..].iter().cloned());
        }
        prop_assert_eq!(unique, split_sentences(&text));
    }

    #[test]
    fn consecutive_chunks_share_overlap_sentences(
        sentences in prop::collection::vec(sentence_strategy(), 2..25),
        chunk_size in 1usize..12,
        overlap in 1usize..4,
    ) {
        let text = sentences.join(" ");
        let chunks = Chunker::new(chunk_size, overlap).chunk(&text, &ChunkMetadata::default());
        for pair in chunks.windows(2) {
            let a = split_sentences(&pair[0].text);
            let b = split_sentences(&pair[1].text);
            if a.len() >= overlap && b.len() >= overlap {
                prop_assert_eq!(&a[a.len() - overlap..], &b[..overlap]);
            }
        }
    }
}
