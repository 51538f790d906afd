pub mod timeline;

pub use timeline::TimelineRepository;
