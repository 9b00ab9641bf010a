//! Static display labels for countries and categories.

use crate::models::CategoryGroup;

/// Country code → display label
pub const COUNTRY_LABELS: &[(&str, &str)] = &[
    ("ru", "Россия"),
    ("ua", "Украина"),
    ("by", "Беларусь"),
    ("kz", "Казахстан"),
    ("us", "США"),
    ("gb", "Великобритания"),
    ("de", "Германия"),
    ("fr", "Франция"),
    ("it", "Италия"),
    ("es", "Испания"),
    ("tr", "Турция"),
    ("pl", "Польша"),
    ("nl", "Нидерланды"),
    ("be", "Бельгия"),
    ("ca", "Канада"),
    ("au", "Австралия"),
    ("il", "Израиль"),
    ("pt", "Португалия"),
    ("gr", "Греция"),
    ("cz", "Чехия"),
    ("hu", "Венгрия"),
    ("ro", "Румыния"),
    ("bg", "Болгария"),
    ("at", "Австрия"),
    ("ch", "Швейцария"),
    ("se", "Швеция"),
    ("no", "Норвегия"),
    ("fi", "Финляндия"),
    ("dk", "Дания"),
    ("ie", "Ирландия"),
    ("br", "Бразилия"),
    ("ar", "Аргентина"),
    ("cl", "Чили"),
    ("co", "Колумбия"),
    ("mx", "Мексика"),
    ("cn", "Китай"),
    ("jp", "Япония"),
    ("kr", "Южная Корея"),
    ("in", "Индия"),
    ("sa", "Саудовская Аравия"),
    ("ae", "ОАЭ"),
    ("eg", "Египет"),
    ("za", "ЮАР"),
];

/// Search-result categories promoted to their own group unless remapped
pub const CATEGORY_LABELS: &[(&str, &str)] = &[("music", "Музыка"), ("movies", "Кино")];

/// Categories requested one by one in fan-out mode, in output order
pub const FANOUT_CATEGORIES: &[(&str, &str)] = &[
    ("informational", "Новости"),
    ("entertaining", "Развлекательные"),
    ("educational", "Познавательные"),
    ("movies", "Кино"),
    ("documentaries", "Документальные"),
    ("sport", "Спорт"),
    ("fashion", "Мода"),
    ("music", "Музыка"),
    ("regional", "Региональные"),
    ("ethnic", "Этнические"),
    ("religion", "Религиозные"),
    ("teleshop", "Телемагазины"),
    ("erotic_18_plus", "Эротика 18+"),
    ("other_18_plus", "Другое 18+"),
    ("cyber_games", "Киберспорт"),
    ("amateur", "Любительские"),
    ("webcam", "Веб-камеры"),
];

pub const DEFAULT_GROUP: &str = "Прочее";

fn lookup(table: &[(&str, &'static str)], code: &str) -> Option<&'static str> {
    let code = code.trim();
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(code))
        .map(|(_, label)| *label)
}

pub fn country_label(code: &str) -> Option<&'static str> {
    lookup(COUNTRY_LABELS, code)
}

/// Country label, or the upper-cased code when the country is not in the table
pub fn country_label_or_code(code: &str) -> String {
    country_label(code)
        .map(str::to_string)
        .unwrap_or_else(|| code.trim().to_uppercase())
}

pub fn default_categories() -> Vec<CategoryGroup> {
    FANOUT_CATEGORIES
        .iter()
        .map(|(key, label)| CategoryGroup::new(*key, *label))
        .collect()
}
