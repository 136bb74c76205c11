//! Response parsing
//!
//! Ranked search pages are HTML scraped with `scraper`; collection and thing
//! responses are XML walked with `quick-xml` events. All functions are pure:
//! a body goes in, records (or [`FetchError::Parse`]) come out.

use crate::error::FetchError;
use crate::models::records::{
    CollectionEntry, CollectionSubtype, GameDetail, GameType, PlayerCountVotes, TopEntry, round_to,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use scraper::{ElementRef, Html, Selector};

/// BGG family rank names and their display labels
pub const FAMILY_LABELS: &[(&str, &str)] = &[
    ("thematic", "Thematic"),
    ("strategygames", "Strategy"),
    ("abstracts", "Abstract"),
    ("childrensgames", "Children's Game"),
    ("cgs", "Customizable"),
    ("familygames", "Family"),
    ("partygames", "Party Game"),
    ("wargames", "Wargame"),
];

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("invalid selector {}: {}", css, e)))
}

fn cell_text(cell: &ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Extract the numeric id from `/boardgame/<id>/...` or `/boardgameexpansion/<id>/...`
pub fn game_id_from_href(href: &str) -> Option<String> {
    for prefix in ["/boardgameexpansion/", "/boardgame/"] {
        if let Some(pos) = href.find(prefix) {
            let digits: String = href[pos + prefix.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !digits.is_empty() {
                return Some(digits);
            }
        }
    }
    None
}

/// Parse one ranked search page
///
/// A page without the results table yields no entries, which ends paging.
pub fn parse_top_page(body: &str) -> Result<Vec<TopEntry>, FetchError> {
    let document = Html::parse_document(body);
    let table_sel = selector("table.collection_table")?;
    let row_sel = selector("tr[id]")?;
    let cell_sel = selector("td")?;
    let anchor_sel = selector("a")?;

    let Some(table) = document.select(&table_sel).next() else {
        return Ok(Vec::new());
    };

    let mut entries = Vec::new();
    for row in table.select(&row_sel) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_sel).collect();
        if cells.len() < 6 {
            continue;
        }
        let Some(anchor) = cells[2].select(&anchor_sel).next() else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default();
        let Some(bgg_id) = game_id_from_href(href) else {
            continue;
        };
        let game_type = if href.contains("boardgameexpansion") {
            GameType::Expansion
        } else {
            GameType::BaseGame
        };

        entries.push(TopEntry {
            bgg_id,
            title: cell_text(&anchor),
            game_type,
            avg_rating: cell_text(&cells[4]).parse().ok(),
            num_voters: cell_text(&cells[5]).replace(',', "").parse().ok(),
        });
    }
    Ok(entries)
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Reject bodies that are not an XML document rooted at `expected_root`
fn check_root(name: &[u8], expected_root: &[u8], body: &str) -> Result<(), FetchError> {
    if name == expected_root {
        return Ok(());
    }
    Err(FetchError::Parse(format!(
        "unexpected root element <{}>: {}",
        String::from_utf8_lossy(name),
        snippet(body)
    )))
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    trimmed.chars().take(120).collect()
}

fn xml_error(err: quick_xml::Error, body: &str) -> FetchError {
    FetchError::Parse(format!("malformed XML ({}): {}", err, snippet(body)))
}

/// Parse a collection response for one subtype
pub fn parse_collection(
    body: &str,
    subtype: CollectionSubtype,
) -> Result<Vec<CollectionEntry>, FetchError> {
    let mut reader = Reader::from_str(body);
    let mut saw_root = false;
    let mut entries = Vec::new();
    let mut current: Option<CollectionEntry> = None;
    let mut in_name = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if saw_root && e.local_name().as_ref() == b"name" => {
                in_name = current.is_some();
            }
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local_name = e.local_name();
                let name = local_name.as_ref();
                if !saw_root {
                    check_root(name, b"items", body)?;
                    saw_root = true;
                    continue;
                }
                match name {
                    b"item" => {
                        current = attr(e, b"objectid").map(|bgg_id| CollectionEntry {
                            bgg_id,
                            title: String::new(),
                            game_type: subtype.game_type(),
                            avg_rating: None,
                            num_voters: None,
                        });
                    }
                    b"average" => {
                        if let Some(entry) = current.as_mut() {
                            entry.avg_rating = attr(e, b"value").and_then(|v| v.parse().ok());
                        }
                    }
                    b"usersrated" => {
                        if let Some(entry) = current.as_mut() {
                            entry.num_voters = attr(e, b"value").and_then(|v| v.parse().ok());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_name {
                    if let Some(entry) = current.as_mut() {
                        let text = e.unescape().map_err(|err| xml_error(err, body))?;
                        entry.title.push_str(text.trim());
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"name" => in_name = false,
                b"item" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(xml_error(err, body)),
            _ => {}
        }
    }

    if !saw_root {
        return Err(FetchError::Parse(format!("not an XML document: {}", snippet(body))));
    }
    Ok(entries)
}

/// In-progress `<results numplayers=..>` block of the player-count poll
struct PollResults {
    numplayers: String,
    best: i64,
    rec: i64,
    not: i64,
}

/// Parse a thing response with one `<item>` per requested id
pub fn parse_things(body: &str) -> Result<Vec<GameDetail>, FetchError> {
    let mut reader = Reader::from_str(body);
    let mut saw_root = false;
    let mut details = Vec::new();
    let mut current: Option<GameDetail> = None;
    let mut rank_seen = false;
    let mut in_player_poll = false;
    let mut results: Option<PollResults> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local_name = e.local_name();
                let name = local_name.as_ref();
                if !saw_root {
                    check_root(name, b"items", body)?;
                    saw_root = true;
                    continue;
                }
                if name == b"item" && current.is_none() {
                    current = attr(e, b"id").map(|bgg_id| GameDetail {
                        bgg_id,
                        ..GameDetail::default()
                    });
                    rank_seen = false;
                    continue;
                }
                let Some(detail) = current.as_mut() else {
                    continue;
                };
                match name {
                    b"yearpublished" => {
                        detail.year = attr(e, b"value")
                            .and_then(|v| v.trim().parse::<i64>().ok())
                            .filter(|y| *y != 0);
                    }
                    b"link" => {
                        if attr(e, b"type").as_deref() == Some("boardgamecategory") {
                            if let Some(value) = attr(e, b"value").filter(|v| !v.is_empty()) {
                                detail.categories.push(value);
                            }
                        }
                    }
                    b"averageweight" => {
                        detail.weight = attr(e, b"value")
                            .and_then(|v| v.parse::<f64>().ok())
                            .map(|w| round_to(w, 2));
                    }
                    b"numweights" => {
                        detail.weight_votes = attr(e, b"value").and_then(|v| v.parse().ok());
                    }
                    b"rank" => {
                        let rank_name = attr(e, b"name");
                        if rank_name.as_deref() == Some("boardgame") && !rank_seen {
                            rank_seen = true;
                            detail.bgg_rank = attr(e, b"value")
                                .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
                                .and_then(|v| v.parse().ok());
                        }
                        if attr(e, b"type").as_deref() == Some("family") {
                            if let Some(label) = rank_name.as_deref().and_then(family_label) {
                                detail.families.push(label.to_string());
                            }
                        }
                    }
                    b"poll" => {
                        in_player_poll =
                            attr(e, b"name").as_deref() == Some("suggested_numplayers");
                    }
                    b"results" if in_player_poll => {
                        results = Some(PollResults {
                            numplayers: attr(e, b"numplayers").unwrap_or_default(),
                            best: 0,
                            rec: 0,
                            not: 0,
                        });
                    }
                    b"result" => {
                        if let Some(block) = results.as_mut() {
                            let votes = attr(e, b"numvotes")
                                .and_then(|v| v.parse::<i64>().ok())
                                .unwrap_or(0);
                            match attr(e, b"value").as_deref() {
                                Some("Best") => block.best = votes,
                                Some("Recommended") => block.rec = votes,
                                Some("Not Recommended") => block.not = votes,
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"results" => {
                    if let (Some(block), Some(detail)) = (results.take(), current.as_mut()) {
                        if let Some(votes) = finish_poll_results(block) {
                            detail.player_counts.push(votes);
                        }
                    }
                }
                b"poll" => in_player_poll = false,
                b"item" => {
                    if let Some(mut detail) = current.take() {
                        detail.families.sort();
                        detail.families.dedup();
                        details.push(detail);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(xml_error(err, body)),
            _ => {}
        }
    }

    if !saw_root {
        return Err(FetchError::Parse(format!("not an XML document: {}", snippet(body))));
    }
    Ok(details)
}

/// `8+` style open-ended counts are dropped
fn finish_poll_results(block: PollResults) -> Option<PlayerCountVotes> {
    if block.numplayers.contains('+') {
        return None;
    }
    let player_count = block.numplayers.trim().parse::<i64>().ok()?;
    Some(PlayerCountVotes {
        player_count,
        best_votes: block.best,
        rec_votes: block.rec,
        not_votes: block.not,
    })
}

fn family_label(rank_name: &str) -> Option<&'static str> {
    FAMILY_LABELS
        .iter()
        .find(|(key, _)| *key == rank_name)
        .map(|(_, label)| *label)
}
