use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};
use serde::Serialize;

use crate::engine::Engine;

/// The largest page a caller may request.
const MAX_PAGE_SIZE: usize = 500;

/// Page selection, read from the `page_num` and `page_size` query parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pagination {
    page_num: usize,
    page_size: usize,
}

impl Pagination {
    /// `page_num` is 1-indexed; both values must be non-zero.
    pub fn new(page_num: usize, page_size: usize) -> Option<Self> {
        (page_num >= 1 && (1..=MAX_PAGE_SIZE).contains(&page_size)).then_some(Self {
            page_num,
            page_size,
        })
    }

    pub fn page_num(&self) -> usize {
        self.page_num
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Items before the requested page. Saturates, so an absurd page number
    /// yields an empty page.
    pub fn skip(&self) -> usize {
        (self.page_num - 1).saturating_mul(self.page_size)
    }

    /// Cut the requested page out of a full result list.
    pub fn paginate<T>(self, items: Vec<T>) -> Paginated<T> {
        let total = items.len();
        let items = items
            .into_iter()
            .skip(self.skip())
            .take(self.page_size)
            .collect();
        Paginated {
            items,
            pagination: PaginationResult {
                page_num: self.page_num,
                page_size: self.page_size,
                total,
            },
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Pagination {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let default_page_size = req
            .rocket()
            .state::<Engine>()
            .map_or(50, |engine| engine.settings().default_page_size);
        let page_num = match req.query_value::<usize>("page_num").unwrap_or(Ok(1)) {
            Ok(page_num) => page_num,
            Err(_) => return request::Outcome::Error((Status::BadRequest, ())),
        };
        let page_size = match req
            .query_value::<usize>("page_size")
            .unwrap_or(Ok(default_page_size))
        {
            Ok(page_size) => page_size,
            Err(_) => return request::Outcome::Error((Status::BadRequest, ())),
        };
        match Self::new(page_num, page_size) {
            Some(pagination) => request::Outcome::Success(pagination),
            None => request::Outcome::Error((Status::BadRequest, ())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationResult {
    pub page_num: usize,
    pub page_size: usize,
    pub total: usize,
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub pagination: PaginationResult,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}
