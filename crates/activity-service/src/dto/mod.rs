//! 请求/响应 DTO 定义

mod request;
mod response;

pub use request::{BatchPublishRequest, CreateActivityRequest, ListActivitiesParams};
pub use response::{
    ApiResponse, BatchPublishedDto, DeletedDto, PageResponse, Pagination, PublishedDto,
};
