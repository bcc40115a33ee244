use bytes::Bytes;
use serde::Serialize;

use crate::types::{Actor, Batch, ClientId, Country, Credit, Movie, Review};

pub fn client(id: &str) -> ClientId {
    ClientId::new(id)
}

/// Builds a movie with a budget and revenue of 1 and no production countries.
pub fn movie(id: &str, title: &str) -> Movie {
    Movie {
        id: id.to_string(),
        title: title.to_string(),
        year: 2000,
        genres: Vec::new(),
        production_countries: Vec::new(),
        budget: 1,
        revenue: 1,
        overview: String::new(),
    }
}

pub fn movie_from(id: &str, title: &str, country: &str, budget: u64, revenue: u64) -> Movie {
    Movie {
        production_countries: vec![Country {
            iso_3166_1: country.to_string(),
            name: country.to_string(),
        }],
        budget,
        revenue,
        ..movie(id, title)
    }
}

pub fn review(id: &str, movie_id: &str, rating: f64) -> Review {
    Review {
        id: id.to_string(),
        movie_id: movie_id.to_string(),
        rating,
    }
}

/// Builds a credit whose actor ids are also their names.
pub fn credit(movie_id: &str, actors: &[&str]) -> Credit {
    Credit {
        actors: actors
            .iter()
            .map(|name| Actor {
                actor_id: name.to_string(),
                name: name.to_string(),
            })
            .collect(),
        movie_id: movie_id.to_string(),
    }
}

/// Encodes a data batch of `items` for `client_id`.
pub fn data_payload<T: Serialize>(client_id: &str, items: Vec<T>) -> Bytes {
    encode(&Batch::data(client(client_id), items))
}

pub fn terminal_payload<T: Serialize>(client_id: &str, total: u32) -> Bytes {
    encode(&Batch::<T>::terminal(client(client_id), total))
}

pub fn cleanup_payload<T: Serialize>(client_id: &str) -> Bytes {
    encode(&Batch::<T>::cleanup(client(client_id)))
}

fn encode<T: Serialize>(batch: &Batch<T>) -> Bytes {
    batch.encode().expect("failed to encode test batch")
}
