pub mod candidate_pool;
pub mod embedding_queue;
pub mod embedding_text;
pub mod fanout;
pub mod heuristic;
pub mod mmr;
pub mod providers;
pub mod recommendations;
pub mod taste_profile;
pub mod taste_vector;
pub mod vector_math;
pub mod vector_scorer;

pub use candidate_pool::{CandidatePool, CandidatePoolBuilder};
pub use embedding_queue::{EmbeddingWorker, WorkerHandle};
pub use embedding_text::EmbeddingProducer;
pub use heuristic::HeuristicTier;
pub use recommendations::Recommender;
pub use taste_profile::{TasteProfile, TasteProfileBuilder};
pub use taste_vector::{TasteVectorBuilder, TasteVectors};
pub use vector_scorer::VectorTier;
