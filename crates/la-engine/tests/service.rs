mod common;

use la_engine::{
    CancelToken, ContinueRequest, EngineConfig, EngineError, HighlightRequest, InferenceService,
    LeadingMarker, LookaheadEngine, NextTokenRequest,
};
use la_model::{BpeTokenizer, ChatMessage, LlamaModel};
use la_tensor::CpuBackend;

use common::{DOCUMENT, INSTRUCTION};

type LlamaService = InferenceService<LlamaModel, BpeTokenizer>;

fn write_model() -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    common::gguf_builder().write_to(file.path()).unwrap();
    file
}

fn next_req(k: usize) -> NextTokenRequest {
    NextTokenRequest {
        original_document: DOCUMENT.into(),
        instruction: Some(INSTRUCTION.into()),
        continuation: "the".into(),
        k: Some(k),
    }
}

#[test]
fn test_gguf_service_matches_in_memory_engine() {
    let file = write_model();
    let service = LlamaService::new(EngineConfig::default());
    service.init_from_gguf(Some(file.path())).unwrap();
    assert!(service.is_ready());

    let served = service.next_token_predictions(&next_req(3), &CancelToken::new()).unwrap();

    let (model, tok, backend) = (common::model(), common::tokenizer(), CpuBackend::new());
    let engine = LookaheadEngine::new(&model, &tok, &backend, &LeadingMarker::StripFirst);
    let local = engine.next_token_predictions(DOCUMENT, INSTRUCTION, "the", 3).unwrap();
    assert_eq!(served.branches, local.branches);

    service.close();
    assert!(matches!(
        service.next_token_predictions(&next_req(3), &CancelToken::new()),
        Err(EngineError::NotInitialized)
    ));
}

#[test]
fn test_model_path_from_config() {
    let file = write_model();
    let config = EngineConfig {
        model_path: Some(file.path().to_path_buf()),
        highlight_top_k: 2,
        ..EngineConfig::default()
    };
    let service = LlamaService::new(config);
    service.init_from_gguf(None).unwrap();

    let req = HighlightRequest {
        document: DOCUMENT.into(),
        instruction: Some(INSTRUCTION.into()),
        edited_document: None,
        k: None,
    };
    let h = service.highlights(&req, &CancelToken::new()).unwrap();
    assert!(!h.is_empty());
    assert!(h.iter().all(|x| x.topk_tokens.len() == 2));

    let req = ContinueRequest {
        messages: vec![ChatMessage::user("the cat")],
        n_branch_tokens: Some(2),
        n_future_tokens: Some(3),
    };
    let branches = service.continue_messages(&req, &CancelToken::new()).unwrap();
    assert_eq!(branches.len(), 2);
    assert!(branches.iter().all(|b| b.tokens.len() == 4));
}

#[test]
fn test_missing_gguf_file() {
    let dir = tempfile::tempdir().unwrap();
    let service = LlamaService::new(EngineConfig::default());
    let err = service
        .init_from_gguf(Some(&dir.path().join("absent.gguf")))
        .unwrap_err();
    assert!(matches!(err, EngineError::Model(_)));
    assert!(!service.is_ready());
}

#[test]
fn test_shared_service_serializes_requests() {
    let file = write_model();
    let service = std::sync::Arc::new(LlamaService::new(EngineConfig::default()));
    service.init_from_gguf(Some(file.path())).unwrap();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let service = service.clone();
            std::thread::spawn(move || {
                service
                    .next_token_predictions(&next_req(2), &CancelToken::new())
                    .unwrap()
                    .texts()
            })
        })
        .collect();
    let results: Vec<Vec<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}
